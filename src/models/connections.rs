use std::env;

use serde::{Deserialize, Serialize};

use crate::errors::DbError;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConnectionConfig {
    /// A `sqlite:` URL or a plain path to the database file.
    pub database_url: String,
    pub busy_timeout_ms: u64,
    pub create_if_missing: bool,
}

impl ConnectionConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            create_if_missing: false,
        }
    }

    /// Reads `DATABASE_URL` and `SQUEAK_BUSY_TIMEOUT_MS`, loading `.env` first.
    pub fn from_env() -> Result<Self, DbError> {
        dotenv::dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| DbError::Config("DATABASE_URL must be set".to_string()))?;

        let mut config = Self::new(database_url);
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), DbError> {
        if let Ok(timeout) = env::var("SQUEAK_BUSY_TIMEOUT_MS") {
            self.busy_timeout_ms = timeout.parse().map_err(|_| {
                DbError::Config(format!("invalid SQUEAK_BUSY_TIMEOUT_MS: '{}'", timeout))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_defaults() {
        let config = ConnectionConfig::new("sqlite:test.db");
        assert_eq!(config.database_url, "sqlite:test.db");
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert!(!config.create_if_missing);
    }
}
