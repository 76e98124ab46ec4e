use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub catalog: FileCatalogConfig,
    #[serde(default)]
    pub broker: FileBrokerConfig,
    #[serde(default)]
    pub sync: FileSyncConfig,
}

/// The password itself is never read from the TOML file, only a path to a
/// secret file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCatalogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBrokerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSyncConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_fetch_attempts: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_retry_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsa_key_bits: Option<usize>,
}

/// Environment-derived configuration values.
#[derive(Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub catalog_url: Option<String>,
    pub catalog_username: Option<String>,
    pub catalog_password: Option<Zeroizing<String>>,
    pub catalog_password_file: Option<PathBuf>,
    pub broker_url: Option<String>,
    pub redis_url: Option<String>,
    pub broker_queue: Option<String>,
    pub broker_task_name: Option<String>,
    pub worker_concurrency: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub page_fetch_attempts: Option<u16>,
    pub page_retry_delay_ms: Option<u64>,
    pub fetch_timeout_ms: Option<u64>,
    pub record_timeout_ms: Option<u64>,
    pub run_timeout_secs: Option<u64>,
    pub rsa_key_bits: Option<usize>,
    /// Variables that were set but could not be parsed, as `(name, value)`.
    pub rejected: Vec<(String, String)>,
}

impl fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvConfig")
            .field("config_path", &self.config_path)
            .field("catalog_url", &self.catalog_url)
            .field("catalog_username", &self.catalog_username)
            .field(
                "catalog_password",
                &self.catalog_password.as_ref().map(|_| "<redacted>"),
            )
            .field("catalog_password_file", &self.catalog_password_file)
            .field("broker_url", &self.broker_url.as_ref().map(|_| "<set>"))
            .field("redis_url", &self.redis_url.as_ref().map(|_| "<set>"))
            .field("broker_queue", &self.broker_queue)
            .field("broker_task_name", &self.broker_task_name)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("queue_capacity", &self.queue_capacity)
            .field("rejected", &self.rejected)
            .finish_non_exhaustive()
    }
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut env_config = Self::default();

        env_config.config_path = var("SITESYNC_CONFIG").map(PathBuf::from);

        env_config.catalog_url = var("CATALOG_URL");
        env_config.catalog_username = var("CATALOG_USERNAME");
        env_config.catalog_password = var("CATALOG_PASSWORD").map(Zeroizing::new);
        env_config.catalog_password_file =
            var("CATALOG_PASSWORD_FILE").map(PathBuf::from);

        env_config.broker_url = var("BROKER_URL");
        env_config.redis_url = var("REDIS_URL");
        env_config.broker_queue = var("BROKER_QUEUE");
        env_config.broker_task_name = var("BROKER_TASK_NAME");

        let mut rejected = Vec::new();
        env_config.worker_concurrency =
            parse_var(&var, "SYNC_WORKER_CONCURRENCY", &mut rejected);
        env_config.queue_capacity =
            parse_var(&var, "SYNC_QUEUE_CAPACITY", &mut rejected);
        env_config.page_fetch_attempts =
            parse_var(&var, "SYNC_PAGE_FETCH_ATTEMPTS", &mut rejected);
        env_config.page_retry_delay_ms =
            parse_var(&var, "SYNC_PAGE_RETRY_DELAY_MS", &mut rejected);
        env_config.fetch_timeout_ms =
            parse_var(&var, "SYNC_FETCH_TIMEOUT_MS", &mut rejected);
        env_config.record_timeout_ms =
            parse_var(&var, "SYNC_RECORD_TIMEOUT_MS", &mut rejected);
        env_config.run_timeout_secs =
            parse_var(&var, "SYNC_RUN_TIMEOUT_SECS", &mut rejected);
        env_config.rsa_key_bits =
            parse_var(&var, "SYNC_RSA_KEY_BITS", &mut rejected);
        env_config.rejected = rejected;

        env_config
    }
}

fn parse_var<T, F>(
    var: &F,
    name: &str,
    rejected: &mut Vec<(String, String)>,
) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = var(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            rejected.push((name.to_string(), raw));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> EnvConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn numeric_values_are_parsed() {
        let config = env(&[
            ("SYNC_WORKER_CONCURRENCY", "8"),
            ("SYNC_PAGE_FETCH_ATTEMPTS", " 5 "),
            ("SYNC_RUN_TIMEOUT_SECS", "600"),
        ]);
        assert_eq!(config.worker_concurrency, Some(8));
        assert_eq!(config.page_fetch_attempts, Some(5));
        assert_eq!(config.run_timeout_secs, Some(600));
        assert!(config.rejected.is_empty());
    }

    #[test]
    fn unparseable_values_are_collected_not_applied() {
        let config = env(&[
            ("SYNC_QUEUE_CAPACITY", "lots"),
            ("SYNC_RSA_KEY_BITS", "-1"),
        ]);
        assert_eq!(config.queue_capacity, None);
        assert_eq!(config.rsa_key_bits, None);
        assert_eq!(
            config.rejected,
            vec![
                ("SYNC_QUEUE_CAPACITY".to_string(), "lots".to_string()),
                ("SYNC_RSA_KEY_BITS".to_string(), "-1".to_string()),
            ]
        );
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = env(&[("CATALOG_URL", "  "), ("CATALOG_PASSWORD", "")]);
        assert!(config.catalog_url.is_none());
        assert!(config.catalog_password.is_none());
    }

    #[test]
    fn debug_output_hides_password() {
        let config = env(&[("CATALOG_PASSWORD", "hunter2")]);
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
