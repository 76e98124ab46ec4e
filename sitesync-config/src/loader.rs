use std::{
    fs,
    path::{Path, PathBuf},
};

use sitesync_core::config::{
    BrokerSettings, CatalogSettings, DEFAULT_BROKER_QUEUE, DEFAULT_BROKER_URL,
    DEFAULT_TASK_NAME, SyncConfig,
};
use thiserror::Error;
use url::Url;
use zeroize::Zeroizing;

use super::{
    models::{Config, ConfigMetadata},
    sources::{EnvConfig, FileCatalogConfig, FileConfig, FileSyncConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] =
    ["sitesync.toml", "config/sitesync.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Command-line override; beats the environment and the file.
    pub worker_concurrency: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_worker_concurrency(mut self, workers: usize) -> Self {
        self.options.worker_concurrency = Some(workers);
        self
    }

    /// Seeds the process environment from `.env` (if any), then resolves.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        self.load_from(EnvConfig::gather(), env_file_loaded)
    }

    /// Resolves against an already gathered environment. Does not touch
    /// the process environment.
    pub fn load_from(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) =
            self.compose_config(file_config, env, config_path, env_file_loaded)?;

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, explicit) = if let Some(path) = &self.options.config_path {
            (path.clone(), true)
        } else if let Some(path) = &env.config_path {
            (path.clone(), true)
        } else {
            match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => (path, false),
                None => return Ok((None, None)),
            }
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
                path: path.clone(),
                source,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| {
                ConfigLoadError::Parse {
                    path: path.clone(),
                    source,
                }
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
        env_file_loaded: bool,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if config_path.is_none() {
            warnings.push_with_hint(
                "No sitesync.toml detected; using environment variables only",
                "Set SITESYNC_CONFIG or pass --config to load a configuration file",
            );
        }
        for (name, value) in &env.rejected {
            warnings.push_with_hint(
                format!("Ignoring {name}={value:?}; not a valid number"),
                format!("Unset {name} to use the default"),
            );
        }

        let FileConfig {
            catalog: file_catalog,
            broker: file_broker,
            sync: file_sync,
        } = file_config.unwrap_or_default();

        let catalog = self.resolve_catalog(&env, &file_catalog)?;

        let broker = BrokerSettings {
            url: env
                .broker_url
                .clone()
                .or_else(|| env.redis_url.clone())
                .or(file_broker.url)
                .unwrap_or_else(|| DEFAULT_BROKER_URL.to_string()),
            queue: env
                .broker_queue
                .clone()
                .or(file_broker.queue)
                .unwrap_or_else(|| DEFAULT_BROKER_QUEUE.to_string()),
            task_name: env
                .broker_task_name
                .clone()
                .or(file_broker.task_name)
                .unwrap_or_else(|| DEFAULT_TASK_NAME.to_string()),
        };

        let mut sync = resolve_sync(&env, &file_sync);
        if let Some(workers) = self.options.worker_concurrency {
            sync.worker_concurrency = workers;
        }

        let config = Config {
            catalog,
            broker,
            sync,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        };

        let guard_warnings = validation::apply_guard_rails(&config)?;
        warnings.extend(guard_warnings);

        Ok((config, warnings))
    }

    fn resolve_catalog(
        &self,
        env: &EnvConfig,
        file_catalog: &FileCatalogConfig,
    ) -> Result<CatalogSettings, ConfigLoadError> {
        let raw_url = env
            .catalog_url
            .clone()
            .or_else(|| file_catalog.url.clone())
            .ok_or(ConfigGuardRailError::MissingSetting {
                name: "CATALOG_URL",
            })?;
        let url = Url::parse(raw_url.trim()).map_err(|source| {
            ConfigLoadError::InvalidUrl {
                field: "CATALOG_URL",
                source,
            }
        })?;

        let username = env
            .catalog_username
            .clone()
            .or_else(|| file_catalog.username.clone())
            .ok_or(ConfigGuardRailError::MissingSetting {
                name: "CATALOG_USERNAME",
            })?;

        let password = self
            .resolve_catalog_password(env, file_catalog)?
            .ok_or(ConfigGuardRailError::MissingSetting {
                name: "CATALOG_PASSWORD",
            })?;

        Ok(CatalogSettings {
            url,
            username,
            password,
        })
    }

    fn resolve_catalog_password(
        &self,
        env: &EnvConfig,
        file_catalog: &FileCatalogConfig,
    ) -> Result<Option<Zeroizing<String>>, ConfigLoadError> {
        if let Some(password) = env.catalog_password.clone() {
            return Ok(Some(password));
        }

        for path in [
            env.catalog_password_file.as_ref(),
            file_catalog.password_file.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            if let Some(secret) = Self::read_secret_file(path)? {
                return Ok(Some(secret));
            }
        }

        Ok(None)
    }

    fn read_secret_file(
        path: &Path,
    ) -> Result<Option<Zeroizing<String>>, ConfigLoadError> {
        let contents = Zeroizing::new(fs::read_to_string(path).map_err(
            |source| ConfigLoadError::SecretFileIo {
                path: path.to_path_buf(),
                source,
            },
        )?);
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Zeroizing::new(trimmed.to_string())))
        }
    }
}

fn resolve_sync(env: &EnvConfig, file: &FileSyncConfig) -> SyncConfig {
    let defaults = SyncConfig::default();
    SyncConfig {
        worker_concurrency: env
            .worker_concurrency
            .or(file.worker_concurrency)
            .unwrap_or(defaults.worker_concurrency),
        queue_capacity: env
            .queue_capacity
            .or(file.queue_capacity)
            .unwrap_or(defaults.queue_capacity),
        page_fetch_attempts: env
            .page_fetch_attempts
            .or(file.page_fetch_attempts)
            .unwrap_or(defaults.page_fetch_attempts),
        page_retry_delay_ms: env
            .page_retry_delay_ms
            .or(file.page_retry_delay_ms)
            .unwrap_or(defaults.page_retry_delay_ms),
        fetch_timeout_ms: env
            .fetch_timeout_ms
            .or(file.fetch_timeout_ms)
            .unwrap_or(defaults.fetch_timeout_ms),
        record_timeout_ms: env
            .record_timeout_ms
            .or(file.record_timeout_ms)
            .unwrap_or(defaults.record_timeout_ms),
        run_timeout_secs: env
            .run_timeout_secs
            .or(file.run_timeout_secs)
            .or(defaults.run_timeout_secs),
        rsa_key_bits: env
            .rsa_key_bits
            .or(file.rsa_key_bits)
            .unwrap_or(defaults.rsa_key_bits),
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {field}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to read secret file {path}")]
    SecretFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
