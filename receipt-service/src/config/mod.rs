use crate::services::ReconcilerConfig;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub mongodb: MongoConfig,
    pub reconciliation: ReconciliationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    /// Id of the settings entry holding the grace period in days.
    pub grace_setting_id: String,
    /// Ignore FAILED receipts when locating a user's latest receipt.
    pub exclude_failed_from_baseline: bool,
}

impl From<&ReconciliationConfig> for ReconcilerConfig {
    fn from(config: &ReconciliationConfig) -> Self {
        ReconcilerConfig {
            grace_setting_id: config.grace_setting_id.clone(),
            exclude_failed_from_baseline: config.exclude_failed_from_baseline,
        }
    }
}

impl ReceiptConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = common_config.is_prod();

        Ok(ReceiptConfig {
            common: common_config,
            service_name: get_env("SERVICE_NAME", Some("receipt-service"), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("receipt_db"), is_prod)?,
            },
            reconciliation: ReconciliationConfig {
                grace_setting_id: get_env(
                    "RECEIPT_GRACE_SETTING_ID",
                    Some("grace_period"),
                    false,
                )?,
                exclude_failed_from_baseline: parse_flag(
                    "RECEIPT_EXCLUDE_FAILED_FROM_BASELINE",
                    &get_env("RECEIPT_EXCLUDE_FAILED_FROM_BASELINE", Some("true"), false)?,
                )?,
            },
        })
    }

    /// Defaults for local runs and tests: ephemeral port, no exporter.
    pub fn for_tests() -> Self {
        ReceiptConfig {
            common: core_config::Config {
                port: 0,
                environment: "test".to_string(),
            },
            service_name: "receipt-service".to_string(),
            log_level: "warn".to_string(),
            otlp_endpoint: None,
            mongodb: MongoConfig {
                uri: "mongodb://localhost:27017".to_string(),
                database: "receipt_db_test".to_string(),
            },
            reconciliation: ReconciliationConfig {
                grace_setting_id: "grace_period".to_string(),
                exclude_failed_from_baseline: true,
            },
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, AppError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must be true or false, got {:?}",
            key,
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("FLAG", "true").unwrap());
        assert!(parse_flag("FLAG", " TRUE ").unwrap());
        assert!(parse_flag("FLAG", "1").unwrap());
        assert!(!parse_flag("FLAG", "false").unwrap());
        assert!(!parse_flag("FLAG", "0").unwrap());
    }

    #[test]
    fn unparseable_flag_is_a_config_error() {
        let err = parse_flag("RECEIPT_EXCLUDE_FAILED_FROM_BASELINE", "maybe").unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert!(err.to_string().contains("RECEIPT_EXCLUDE_FAILED_FROM_BASELINE"));
    }
}
