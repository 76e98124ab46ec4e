use thiserror::Error;
use url::Url;

use super::models::Config;

const RECOMMENDED_KEY_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{name} is required but was not provided")]
    MissingSetting { name: &'static str },
    #[error("catalog URL must use http or https, got `{scheme}`")]
    UnsupportedCatalogScheme { scheme: String },
    #[error("invalid broker URL: {reason}")]
    InvalidBrokerUrl { reason: String },
    #[error("{field} must not be empty")]
    EmptyValue { field: &'static str },
    #[error("invalid sync settings: {reason}")]
    InvalidSyncSettings { reason: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    match config.catalog.url.scheme() {
        "https" => {}
        "http" => warnings.push_with_hint(
            "CATALOG_URL uses plain http; the session token and encrypted credentials travel unprotected",
            "Point CATALOG_URL at an https endpoint outside local development",
        ),
        other => {
            return Err(ConfigGuardRailError::UnsupportedCatalogScheme {
                scheme: other.to_string(),
            });
        }
    }

    if config.catalog.username.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyValue {
            field: "CATALOG_USERNAME",
        });
    }
    if config.catalog.password.is_empty() {
        return Err(ConfigGuardRailError::EmptyValue {
            field: "CATALOG_PASSWORD",
        });
    }

    validate_broker_url(&config.broker.url)?;
    if config.broker.queue.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyValue {
            field: "BROKER_QUEUE",
        });
    }
    if config.broker.task_name.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyValue {
            field: "BROKER_TASK_NAME",
        });
    }

    config.sync.validate().map_err(|err| {
        ConfigGuardRailError::InvalidSyncSettings {
            reason: err.to_string(),
        }
    })?;

    if config.sync.rsa_key_bits < RECOMMENDED_KEY_BITS {
        warnings.push_with_hint(
            format!(
                "SYNC_RSA_KEY_BITS is {}; keys under {RECOMMENDED_KEY_BITS} bits are weak",
                config.sync.rsa_key_bits
            ),
            "Use 2048 or 4096 bit keys outside tests",
        );
    }

    if config.sync.queue_capacity < config.sync.worker_concurrency {
        warnings.push(format!(
            "SYNC_QUEUE_CAPACITY ({}) is smaller than SYNC_WORKER_CONCURRENCY ({}); some workers will sit idle",
            config.sync.queue_capacity, config.sync.worker_concurrency
        ));
    }

    Ok(warnings)
}

fn validate_broker_url(raw: &str) -> Result<(), ConfigGuardRailError> {
    let parsed = Url::parse(raw).map_err(|err| {
        ConfigGuardRailError::InvalidBrokerUrl {
            reason: err.to_string(),
        }
    })?;

    match parsed.scheme() {
        "redis" | "rediss" | "redis+unix" | "unix" => Ok(()),
        other => Err(ConfigGuardRailError::InvalidBrokerUrl {
            reason: format!("unsupported scheme `{other}`"),
        }),
    }
}
