use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::identity::Principal;

/// In-memory browser-session store (replace with a persistent store in
/// production). The access-control core only ever reads it to resolve
/// identity; creation and deletion belong to the login/logout endpoints.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Principal>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, principal: Principal) -> String {
        let sid = Uuid::new_v4().to_string();
        self.sessions.write().await.insert(sid.clone(), principal);
        sid
    }

    pub async fn get(&self, sid: &str) -> Option<Principal> {
        self.sessions.read().await.get(sid).cloned()
    }

    pub async fn delete(&self, sid: &str) {
        self.sessions.write().await.remove(sid);
    }
}
