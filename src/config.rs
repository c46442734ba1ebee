// src/config.rs
use std::str::FromStr;
use std::time::Duration;

use ledger::{Exemption, LedgerOptions};
use serde::Deserialize;
use thiserror::Error;

use crate::collaborators::StaticBankDirectory;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} invalid: '{value}'")]
    Invalid { var: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    #[default]
    Memory,
    Postgres,
    Redis,
}

impl FromStr for LockBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown lock backend {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Absent means the in-memory adapter.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub lock_backend: LockBackend,
    /// Size of the advisory-lock pool, kept apart from the ledger pool
    /// since every lease holds a connection for the whole request.
    pub lock_max_connections: u32,
    pub redis_url: Option<String>,
    pub lock_ttl_ms: u64,
    pub lock_exemptions: Vec<Exemption>,
    pub notify_timeout_ms: u64,
    pub reversal_bank_name: String,
    pub reversal_failure_reason: String,
    /// `imd=name` pairs.
    pub banks: String,
    /// Flat credit ceiling per principal; unlimited when absent.
    pub credit_limit: Option<i64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 5,
            lock_backend: LockBackend::Memory,
            lock_max_connections: 10,
            redis_url: None,
            lock_ttl_ms: 30_000,
            lock_exemptions: Exemption::defaults(),
            notify_timeout_ms: 5_000,
            reversal_bank_name: "ucash".to_string(),
            reversal_failure_reason: "Raast Service Error".to_string(),
            banks: String::new(),
            credit_limit: None,
        }
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lock_exemptions = match lookup("RAAST_LOCK_EXEMPT") {
            Some(raw) => raw
                .split(',')
                .filter(|rule| !rule.trim().is_empty())
                .map(|rule| {
                    rule.parse::<Exemption>()
                        .map_err(|_| ConfigError::Invalid {
                            var: "RAAST_LOCK_EXEMPT",
                            value: rule.to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => defaults.lock_exemptions,
        };

        let credit_limit = match lookup("RAAST_CREDIT_LIMIT") {
            Some(value) => Some(value.trim().parse::<i64>().map_err(|_| ConfigError::Invalid {
                var: "RAAST_CREDIT_LIMIT",
                value,
            })?),
            None => None,
        };

        let config = Self {
            database_url: lookup("RAAST_DATABASE_URL").filter(|v| !v.trim().is_empty()),
            db_max_connections: parsed(
                &lookup,
                "RAAST_DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )?,
            lock_backend: match lookup("RAAST_LOCK_BACKEND") {
                Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                    var: "RAAST_LOCK_BACKEND",
                    value,
                })?,
                None => defaults.lock_backend,
            },
            lock_max_connections: parsed(
                &lookup,
                "RAAST_LOCK_MAX_CONNECTIONS",
                defaults.lock_max_connections,
            )?,
            redis_url: lookup("RAAST_REDIS_URL").filter(|v| !v.trim().is_empty()),
            lock_ttl_ms: parsed(&lookup, "RAAST_LOCK_TTL_MS", defaults.lock_ttl_ms)?,
            lock_exemptions,
            notify_timeout_ms: parsed(
                &lookup,
                "RAAST_NOTIFY_TIMEOUT_MS",
                defaults.notify_timeout_ms,
            )?,
            reversal_bank_name: lookup("RAAST_REVERSAL_BANK_NAME")
                .unwrap_or(defaults.reversal_bank_name),
            reversal_failure_reason: lookup("RAAST_REVERSAL_FAILURE_REASON")
                .unwrap_or(defaults.reversal_failure_reason),
            banks: lookup("RAAST_BANKS").unwrap_or(defaults.banks),
            credit_limit,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.lock_backend {
            LockBackend::Postgres if self.database_url.is_none() => {
                return Err(ConfigError::Missing("RAAST_DATABASE_URL"));
            }
            LockBackend::Redis if self.redis_url.is_none() => {
                return Err(ConfigError::Missing("RAAST_REDIS_URL"));
            }
            _ => {}
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "RAAST_DB_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }
        if self.lock_max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "RAAST_LOCK_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }
        self.bank_directory()?;
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn ledger_options(&self) -> LedgerOptions {
        LedgerOptions {
            notify_timeout: Duration::from_millis(self.notify_timeout_ms),
            reversal_failure_reason: self.reversal_failure_reason.clone(),
        }
    }

    pub fn bank_directory(&self) -> Result<StaticBankDirectory, ConfigError> {
        StaticBankDirectory::parse(&self.banks).map_err(|_| ConfigError::Invalid {
            var: "RAAST_BANKS",
            value: self.banks.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.lock_backend, LockBackend::Memory);
        assert_eq!(config.reversal_bank_name, "ucash");
        assert_eq!(config.lock_ttl(), Duration::from_secs(30));
        assert_eq!(config.lock_exemptions, Exemption::defaults());
        assert_eq!(config.lock_max_connections, 10);
    }

    #[test]
    fn test_overrides() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("RAAST_LOCK_BACKEND", "redis"),
            ("RAAST_REDIS_URL", "redis://127.0.0.1/"),
            ("RAAST_LOCK_EXEMPT", "/raast/titlefetch/, deposit/v2/:GET"),
            ("RAAST_NOTIFY_TIMEOUT_MS", "250"),
            ("RAAST_BANKS", "588974=HBL"),
        ]))
        .unwrap();

        assert_eq!(config.lock_backend, LockBackend::Redis);
        assert_eq!(config.lock_exemptions.len(), 2);
        assert_eq!(config.ledger_options().notify_timeout, Duration::from_millis(250));
        assert_eq!(config.bank_directory().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = GatewayConfig::from_lookup(lookup(&[("RAAST_LOCK_TTL_MS", "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "RAAST_LOCK_TTL_MS",
                value: "soon".to_string()
            }
        );

        let err = GatewayConfig::from_lookup(lookup(&[("RAAST_LOCK_MAX_CONNECTIONS", "0")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "RAAST_LOCK_MAX_CONNECTIONS",
                value: "0".to_string()
            }
        );

        let err =
            GatewayConfig::from_lookup(lookup(&[("RAAST_LOCK_BACKEND", "postgres")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("RAAST_DATABASE_URL"));
    }
}
