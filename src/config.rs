use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::warn;

use crate::security::rate_limit::RatePolicy;

const DEV_SIGNING_KEY: &[u8] = b"authgate-insecure-dev-key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bearer token lifetime in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: i64,

    /// Named admission policies. Operators retune these here, not in code.
    #[serde(default = "default_rate_policies")]
    pub rate_policies: Vec<RatePolicy>,

    /// How often the background sweeper evicts expired rate-limit windows.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl_secs(),
            rate_policies: default_rate_policies(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let cfg: Config = serde_json::from_str(&raw).context("parsing JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        for policy in &self.rate_policies {
            if policy.window_secs == 0 || policy.max_requests == 0 {
                bail!(
                    "rate policy '{}' must have a non-zero window and cap",
                    policy.name
                );
            }
        }
        Ok(())
    }
}

fn default_token_ttl_secs() -> i64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_rate_policies() -> Vec<RatePolicy> {
    vec![
        RatePolicy {
            name: "api".to_string(),
            window_secs: 900,
            max_requests: 100,
        },
        RatePolicy {
            name: "auth".to_string(),
            window_secs: 900,
            max_requests: 5,
        },
        RatePolicy {
            name: "external".to_string(),
            window_secs: 900,
            max_requests: 30,
        },
        RatePolicy {
            name: "create".to_string(),
            window_secs: 900,
            max_requests: 20,
        },
    ]
}

/// Admin account seeded into the directory at startup.
pub struct AdminSeed {
    pub username: String,
    pub password: String,
}

impl AdminSeed {
    pub fn from_env() -> Self {
        let username =
            std::env::var("AUTHGATE_ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string());
        let password =
            std::env::var("AUTHGATE_ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
        Self { username, password }
    }
}

/// Load the token signing key. A missing key is fatal outside development;
/// development falls back to a fixed insecure key so local runs work.
pub fn signing_key_from_env() -> Result<Vec<u8>> {
    match std::env::var("AUTHGATE_SIGNING_KEY") {
        Ok(key) if !key.is_empty() => Ok(key.into_bytes()),
        _ => {
            let env =
                std::env::var("AUTHGATE_ENV").unwrap_or_else(|_| "development".to_string());
            if env == "development" {
                warn!("AUTHGATE_SIGNING_KEY not set; using the insecure development key");
                Ok(DEV_SIGNING_KEY.to_vec())
            } else {
                bail!("AUTHGATE_SIGNING_KEY must be set when AUTHGATE_ENV={env}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Mutex, OnceLock};
    use tempfile::NamedTempFile;

    // Env-var tests run serialized; std::env is process-global.
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    #[test]
    fn test_default_policy_table() {
        let cfg = Config::default();
        assert_eq!(cfg.token_ttl_secs, 3600);

        let find = |name: &str| {
            cfg.rate_policies
                .iter()
                .find(|p| p.name == name)
                .unwrap_or_else(|| panic!("missing policy {name}"))
        };
        assert_eq!(find("api").max_requests, 100);
        assert_eq!(find("auth").max_requests, 5);
        assert_eq!(find("external").max_requests, 30);
        assert_eq!(find("create").max_requests, 20);
        assert!(cfg.rate_policies.iter().all(|p| p.window_secs == 900));
    }

    #[test]
    fn test_config_parsing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "token_ttl_secs": 600,
                "rate_policies": [
                    {{"name": "api", "window_secs": 60, "max_requests": 10}}
                ]
            }}"#
        )
        .unwrap();

        let cfg = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.token_ttl_secs, 600);
        assert_eq!(cfg.rate_policies.len(), 1);
        assert_eq!(cfg.rate_policies[0].max_requests, 10);
        // Unspecified fields fall back to defaults.
        assert_eq!(cfg.sweep_interval_secs, 300);
    }

    #[test]
    fn test_config_missing_file() {
        assert!(Config::from_file("/nonexistent/path/config.json").is_err());
    }

    #[test]
    fn test_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{invalid json").unwrap();
        assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_zero_cap_policy_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"rate_policies": [{{"name": "api", "window_secs": 0, "max_requests": 0}}]}}"#
        )
        .unwrap();
        assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_signing_key_fails_fast_outside_development() {
        let _g = lock_env();
        std::env::remove_var("AUTHGATE_SIGNING_KEY");
        std::env::set_var("AUTHGATE_ENV", "production");

        assert!(signing_key_from_env().is_err());

        std::env::remove_var("AUTHGATE_ENV");
    }

    #[test]
    fn test_signing_key_development_fallback() {
        let _g = lock_env();
        std::env::remove_var("AUTHGATE_SIGNING_KEY");
        std::env::remove_var("AUTHGATE_ENV");

        let key = signing_key_from_env().unwrap();
        assert!(!key.is_empty());
    }

    #[test]
    fn test_signing_key_from_env() {
        let _g = lock_env();
        std::env::set_var("AUTHGATE_SIGNING_KEY", "a-real-key");
        std::env::set_var("AUTHGATE_ENV", "production");

        assert_eq!(signing_key_from_env().unwrap(), b"a-real-key".to_vec());

        std::env::remove_var("AUTHGATE_SIGNING_KEY");
        std::env::remove_var("AUTHGATE_ENV");
    }
}
