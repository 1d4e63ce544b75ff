//! Runtime configuration, read from the environment (optionally via `.env`).
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CAPSULE_JWT_SECRET` | required |
//! | `CAPSULE_DB_PATH` | `capsules.db` |
//! | `CAPSULE_UPLOAD_DIR` | `./uploads` |
//! | `CAPSULE_HOST` | `0.0.0.0` |
//! | `CAPSULE_PORT` | `5000` |

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CAPSULE_JWT_SECRET is unset or still a placeholder")]
    WeakSecret,
    #[error("invalid {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = get("CAPSULE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::WeakSecret);
        }

        let db_path = get("CAPSULE_DB_PATH").unwrap_or_else(|| "capsules.db".into()).into();
        let upload_dir = get("CAPSULE_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into()).into();
        let host = get("CAPSULE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = get("CAPSULE_PORT").unwrap_or_else(|| "5000".into());

        let addr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| ConfigError::Invalid {
                name: "CAPSULE_HOST/CAPSULE_PORT",
                value: format!("{}:{}", host, port),
            })?;

        Ok(Self {
            jwt_secret,
            db_path,
            upload_dir,
            addr,
        })
    }
}
