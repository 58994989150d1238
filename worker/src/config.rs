//! Worker configuration.
//!
//! Loaded from environment variables. Database and index locations are
//! required; everything else has a default.

use banking_ledger_runtime::pool::DEFAULT_WORKERS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),
    /// Environment variable set to something unusable
    #[error("Failed to parse {var}: {reason}")]
    ParseError {
        /// Variable name
        var: String,
        /// What was wrong with it
        reason: String,
    },
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// `PostgreSQL` connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `DB_USER`
    pub user: String,
    /// `DB_PASSWORD`
    pub password: String,
    /// `DB_HOST`
    pub host: String,
    /// `DB_PORT` (default: 5432)
    pub port: u16,
    /// `DB_NAME`
    pub name: String,
    /// `DB_MAX_CONNECTIONS` (default: 10)
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Connection URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// `KAFKA_BROKERS` (default: `localhost:9092`)
    pub brokers: String,
    /// `KAFKA_GROUP_ID` (default: `banking-ledger-workers`)
    pub group_id: String,
    /// `ACCOUNT_TOPIC` (default: `account_creator`)
    pub account_topic: String,
    /// `TRANSACTION_TOPIC` (default: `transaction_processor`)
    pub transaction_topic: String,
}

/// Complete worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Ledger database
    pub database: DatabaseConfig,
    /// Request broker
    pub broker: BrokerConfig,
    /// `ELASTICSEARCH_URL`
    pub elasticsearch_url: String,
    /// `NUM_WORKERS` (default: 4; invalid or zero values use the default)
    pub workers: usize,
    /// `AUDIT_ACCOUNT_FAILURES` (default: false)
    pub audit_account_failures: bool,
    /// `METRICS_ADDR`; no exporter when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &str| lookup(var).ok_or_else(|| ConfigError::EnvVarNotSet(var.to_string()));
        let or_default = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let database = DatabaseConfig {
            user: required("DB_USER")?,
            password: or_default("DB_PASSWORD", ""),
            host: required("DB_HOST")?,
            port: parse_or(&lookup, "DB_PORT", 5432)?,
            name: required("DB_NAME")?,
            max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
        };

        let broker = BrokerConfig {
            brokers: or_default("KAFKA_BROKERS", "localhost:9092"),
            group_id: or_default("KAFKA_GROUP_ID", "banking-ledger-workers"),
            account_topic: or_default("ACCOUNT_TOPIC", "account_creator"),
            transaction_topic: or_default("TRANSACTION_TOPIC", "transaction_processor"),
        };

        let workers = lookup("NUM_WORKERS")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_WORKERS);

        let audit_account_failures = lookup("AUDIT_ACCOUNT_FAILURES")
            .is_some_and(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"));

        let metrics_addr = lookup("METRICS_ADDR")
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim().parse::<SocketAddr>().map_err(|e| ConfigError::ParseError {
                    var: "METRICS_ADDR".to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            database,
            broker,
            elasticsearch_url: required("ELASTICSEARCH_URL")?,
            workers,
            audit_account_failures,
            metrics_addr,
        })
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "DB_MAX_CONNECTIONS must be > 0".to_string(),
            ));
        }
        if self.broker.brokers.trim().is_empty() {
            return Err(ConfigError::ValidationError("KAFKA_BROKERS cannot be empty".to_string()));
        }
        if self.broker.account_topic == self.broker.transaction_topic {
            return Err(ConfigError::ValidationError(
                "ACCOUNT_TOPIC and TRANSACTION_TOPIC must differ".to_string(),
            ));
        }
        if !self.elasticsearch_url.starts_with("http://")
            && !self.elasticsearch_url.starts_with("https://")
        {
            return Err(ConfigError::ValidationError(format!(
                "ELASTICSEARCH_URL must be an http(s) URL, got {}",
                self.elasticsearch_url
            )));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    lookup(var).map_or(Ok(default), |s| {
        s.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            var: var.to_string(),
            reason: e.to_string(),
        })
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var: &str| vars.get(var).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("DB_USER", "ledger"),
        ("DB_HOST", "db"),
        ("DB_NAME", "bank"),
        ("ELASTICSEARCH_URL", "http://es:9200"),
    ];

    fn with(extra: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let mut vars: Vec<(&str, &str)> = REQUIRED.to_vec();
        vars.extend_from_slice(extra);
        env(&vars)
    }

    #[test]
    fn defaults() {
        let config = WorkerConfig::from_lookup(with(&[])).expect("required vars are set");

        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.url(), "postgres://ledger:@db:5432/bank");
        assert_eq!(config.broker.brokers, "localhost:9092");
        assert_eq!(config.broker.group_id, "banking-ledger-workers");
        assert_eq!(config.broker.account_topic, "account_creator");
        assert_eq!(config.broker.transaction_topic, "transaction_processor");
        assert_eq!(config.workers, 4);
        assert!(!config.audit_account_failures);
        assert_eq!(config.metrics_addr, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_required_variable() {
        let err = WorkerConfig::from_lookup(env(&[("DB_USER", "ledger")])).unwrap_err();
        assert_eq!(err, ConfigError::EnvVarNotSet("DB_HOST".to_string()));
    }

    #[test]
    fn worker_count_falls_back_to_default() {
        for value in ["0", "-3", "many", ""] {
            let config = WorkerConfig::from_lookup(with(&[("NUM_WORKERS", value)])).unwrap();
            assert_eq!(config.workers, 4, "NUM_WORKERS={value}");
        }

        let config = WorkerConfig::from_lookup(with(&[("NUM_WORKERS", "12")])).unwrap();
        assert_eq!(config.workers, 12);
    }

    #[test]
    fn invalid_port_is_an_error() {
        let err = WorkerConfig::from_lookup(with(&[("DB_PORT", "postgres")])).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { ref var, .. } if var == "DB_PORT"));
    }

    #[test]
    fn optional_settings() {
        let config = WorkerConfig::from_lookup(with(&[
            ("DB_PASSWORD", "s3cret"),
            ("AUDIT_ACCOUNT_FAILURES", "TRUE"),
            ("METRICS_ADDR", "0.0.0.0:9090"),
        ]))
        .unwrap();

        assert!(config.audit_account_failures);
        assert_eq!(config.metrics_addr, Some("0.0.0.0:9090".parse().unwrap()));
        assert_eq!(config.database.url(), "postgres://ledger:s3cret@db:5432/bank");
        assert!(!format!("{:?}", config.database).contains("s3cret"));
    }

    #[test]
    fn invalid_metrics_addr_is_an_error() {
        let err = WorkerConfig::from_lookup(with(&[("METRICS_ADDR", "localhost")])).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { ref var, .. } if var == "METRICS_ADDR"));
    }

    #[test]
    fn validation() {
        let config = WorkerConfig::from_lookup(with(&[("TRANSACTION_TOPIC", "account_creator")])).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let config = WorkerConfig::from_lookup(with(&[("DB_MAX_CONNECTIONS", "0")])).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = WorkerConfig::from_lookup(with(&[])).unwrap();
        config.elasticsearch_url = "es:9200".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::EnvVarNotSet("DB_USER".to_string());
        assert_eq!(err.to_string(), "Environment variable not set: DB_USER");
    }
}
