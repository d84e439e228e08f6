//! Ledger configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::Coins;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// SQLite database file (default: "merch-ledger.db").
    pub database_path: PathBuf,

    /// Maximum pooled connections (default: 8).
    pub max_connections: u32,

    /// How long a statement waits on the store lock before failing (default: 5s).
    pub busy_timeout: Duration,

    /// Deadline applied to each service call made by the CLI (default: none).
    pub operation_timeout: Option<Duration>,

    /// Coins a new account starts with (default: 1000).
    pub opening_balance: Coins,
}

impl LedgerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_path: std::env::var("LEDGER_DATABASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            max_connections: env_parse("LEDGER_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            busy_timeout: env_parse("LEDGER_BUSY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.busy_timeout),
            operation_timeout: env_parse("LEDGER_OPERATION_TIMEOUT_MS")
                .map(Duration::from_millis)
                .or(defaults.operation_timeout),
            opening_balance: env_parse("LEDGER_OPENING_BALANCE")
                .unwrap_or(defaults.opening_balance),
        }
    }

    /// Same configuration pointed at another database file.
    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("merch-ledger.db"),
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
            operation_timeout: None,
            opening_balance: 1000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable configuration value");
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.opening_balance, 1000);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
        assert!(config.operation_timeout.is_none());
    }

    #[test]
    fn test_with_database() {
        let config = LedgerConfig::default().with_database("/tmp/shop.db");
        assert_eq!(config.database_path, PathBuf::from("/tmp/shop.db"));
    }
}
