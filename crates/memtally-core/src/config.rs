//! Accounting configuration that embedders can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingConfig {
    /// Byte limit for the process-wide tracker. Negative means no limit.
    pub process_limit_bytes: i64,

    /// Byte limit applied to query trackers created through the registry
    /// helpers. Negative means no limit.
    pub default_query_limit_bytes: i64,

    /// Trace every consume/release at the entry tracker. Debug aid; off by
    /// default because it fires on the hot path.
    pub log_updates: bool,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            process_limit_bytes: -1,
            default_query_limit_bytes: -1,
            log_updates: false,
        }
    }
}

impl AccountingConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `MEMTALLY_PROCESS_LIMIT_BYTES`: process tracker limit in bytes
    /// - `MEMTALLY_QUERY_LIMIT_BYTES`: default query tracker limit in bytes
    /// - `MEMTALLY_LOG_UPDATES`: "1" or "true" to trace updates
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("MEMTALLY_PROCESS_LIMIT_BYTES") {
            if let Ok(v) = s.parse::<i64>() {
                cfg.process_limit_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("MEMTALLY_QUERY_LIMIT_BYTES") {
            if let Ok(v) = s.parse::<i64>() {
                cfg.default_query_limit_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("MEMTALLY_LOG_UPDATES") {
            cfg.log_updates = s == "1" || s.eq_ignore_ascii_case("true");
        }

        cfg
    }

    /// Reject limits that admit no work at all. A zero byte limit rejects
    /// every charge; unlimited trackers use a negative limit instead.
    pub fn validate(&self) -> Result<()> {
        if self.process_limit_bytes == 0 {
            return Err(Error::Config(
                "process_limit_bytes must be positive or negative (unlimited), not 0".to_string(),
            ));
        }
        if self.default_query_limit_bytes == 0 {
            return Err(Error::Config(
                "default_query_limit_bytes must be positive or negative (unlimited), not 0"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_unlimited() {
        let cfg = AccountingConfig::default();
        assert_eq!(cfg.process_limit_bytes, -1);
        assert_eq!(cfg.default_query_limit_bytes, -1);
        assert!(!cfg.log_updates);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let cfg = AccountingConfig {
            process_limit_bytes: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let cfg = AccountingConfig {
            process_limit_bytes: 8 * 1024 * 1024 * 1024,
            default_query_limit_bytes: 512 * 1024 * 1024,
            log_updates: true,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: AccountingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.process_limit_bytes, cfg.process_limit_bytes);
        assert_eq!(back.default_query_limit_bytes, cfg.default_query_limit_bytes);
        assert!(back.log_updates);
    }
}
