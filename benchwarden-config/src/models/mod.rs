pub mod sources;

use std::path::PathBuf;
use std::time::Duration;

use benchwarden_core::environment::{ProfileSelector, StaticEnvironment};
use benchwarden_core::orchestration::{ProcessRunnerSettings, ReconcilerConfig};
use benchwarden_core::types::{ProfileCatalog, ScanProfile, ScheduleDefinition};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub reconciler: ReconcilerConfig,
    pub runner: ProcessRunnerSettings,
    pub cluster: ClusterConfig,
    pub profiles: Vec<ScanProfile>,
    pub selection: ProfileSelector,
    /// Schedules admitted at startup.
    pub schedules: Vec<ScheduleDefinition>,
    pub registration: RegistrationConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Catalog without a default; the server picks one after detection.
    pub fn profile_catalog(&self) -> benchwarden_core::Result<ProfileCatalog> {
        ProfileCatalog::new(self.profiles.iter().cloned())
    }

    pub fn environment(&self) -> StaticEnvironment {
        StaticEnvironment::new(&self.cluster.provider, &self.cluster.version)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Cluster identity reported by the configuration-backed environment.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub provider: String,
    pub version: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            provider: "generic".to_string(),
            version: "v1.20.0".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub timeout: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    Explicit(PathBuf),
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub source: ConfigSource,
    pub env_file_loaded: bool,
}

/// Profiles shipped when the configuration names none.
pub fn default_profiles() -> Vec<ScanProfile> {
    vec![
        ScanProfile::new("cis-1.6-profile", "cis-1.6"),
        ScanProfile::new("rke-profile-permissive", "rke-cis-1.6-permissive"),
        ScanProfile::new("rke-profile-hardened", "rke-cis-1.6-hardened"),
        ScanProfile::new("eks-profile", "eks-1.0"),
        ScanProfile::new("gke-profile", "gke-1.0"),
    ]
}
