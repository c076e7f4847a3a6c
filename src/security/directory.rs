use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use thiserror::Error;
use tokio::sync::RwLock;

use super::identity::{Principal, Role};

/// Directory row. The PHC hash never leaves this module.
#[derive(Clone)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    password_hash: String,
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl UserRecord {
    fn principal(&self) -> Principal {
        Principal {
            id: self.id,
            display_name: self.display_name.clone(),
            role: self.role,
        }
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("username already taken")]
    UsernameTaken,
    #[error(transparent)]
    Hash(#[from] anyhow::Error),
}

/// In-memory user directory: the credential-checking collaborator behind
/// the login endpoints. Usernames are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    inner: Arc<RwLock<DirectoryInner>>,
}

#[derive(Debug, Default)]
struct DirectoryInner {
    next_id: u64,
    by_username: HashMap<String, UserRecord>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<Principal, DirectoryError> {
        let password_hash = hash_password(password)?;

        let mut inner = self.inner.write().await;
        let key = username.to_lowercase();
        if inner.by_username.contains_key(&key) {
            return Err(DirectoryError::UsernameTaken);
        }
        inner.next_id += 1;
        let record = UserRecord {
            id: inner.next_id,
            username: username.to_string(),
            display_name: username.to_string(),
            role,
            password_hash,
        };
        let principal = record.principal();
        inner.by_username.insert(key, record);
        Ok(principal)
    }

    /// Verify a username/password pair. `None` covers both unknown user
    /// and wrong password; callers must not reveal which.
    pub async fn verify_credentials(&self, username: &str, password: &str) -> Option<Principal> {
        let record = {
            let inner = self.inner.read().await;
            inner.by_username.get(&username.to_lowercase()).cloned()
        };
        let record = record?;
        if verify_password(&record.password_hash, password) {
            Some(record.principal())
        } else {
            None
        }
    }
}

fn hash_password(password: &str) -> Result<String, anyhow::Error> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!(e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}
