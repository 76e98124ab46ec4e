use std::path::PathBuf;

use sitesync_core::config::{BrokerSettings, CatalogSettings, SyncConfig};

/// Fully resolved configuration for one process.
#[derive(Debug, Clone)]
pub struct Config {
    pub catalog: CatalogSettings,
    pub broker: BrokerSettings,
    pub sync: SyncConfig,
    pub metadata: ConfigMetadata,
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
