//! Configuration loading for sitesync.
//!
//! Values come from the environment (optionally seeded from a `.env` file),
//! an optional TOML file, and built-in defaults, in that order of
//! precedence. Guard rails run on the composed result so the binary never
//! starts a pass with settings that cannot work.

#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{Config, ConfigMetadata};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
