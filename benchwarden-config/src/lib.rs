//! Shared configuration library for benchwarden.
//!
//! Resolves the process configuration from a TOML/JSON file, inline JSON,
//! and individual environment overrides, then applies guard rails. Fatal
//! problems surface as [`ConfigLoadError`]; everything else becomes a
//! [`ConfigWarning`] for the server to log.

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::sources::{EnvConfig, FileConfig};
pub use models::{
    ClusterConfig, Config, ConfigMetadata, ConfigSource, RegistrationConfig,
    ServerConfig, default_profiles,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
