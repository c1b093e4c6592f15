use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use benchwarden_core::environment::SelectionRule;
use benchwarden_core::orchestration::ReconcilerConfig;
use benchwarden_core::types::{ConcurrencyPolicy, ScanProfile, ScanTarget};

use crate::util::{non_empty_var, parse_csv_var};

/// Raw configuration as defined in a TOML or JSON file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    pub reconciler: Option<ReconcilerConfig>,
    #[serde(default)]
    pub runner: FileRunnerConfig,
    #[serde(default)]
    pub cluster: FileClusterConfig,
    pub profiles: Option<Vec<ScanProfile>>,
    #[serde(default)]
    pub selection: FileSelectionConfig,
    #[serde(default)]
    pub schedules: Vec<FileSchedule>,
    #[serde(default)]
    pub registration: FileRegistrationConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRunnerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileClusterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSelectionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<SelectionRule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// Seed schedule; durations are human-style (`"45m"`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileSchedule {
    #[serde(default = "default_scope")]
    pub scope: String,
    pub name: String,
    pub cadence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default)]
    pub target: ScanTarget,
    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default)]
    pub suspended: bool,
}

fn default_scope() -> String {
    "default".to_string()
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRegistrationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub config_json: Option<String>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub cluster_provider: Option<String>,
    pub cluster_version: Option<String>,
    pub scan_workers: Option<usize>,
    pub bench_command: Option<String>,
    pub bench_args: Option<Vec<String>>,
    pub registration_timeout: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: non_empty_var("BENCHWARDEN_CONFIG_PATH").map(PathBuf::from),
            config_json: non_empty_var("BENCHWARDEN_CONFIG_JSON"),
            server_host: non_empty_var("SERVER_HOST"),
            server_port: non_empty_var("SERVER_PORT").and_then(|s| s.parse().ok()),
            cluster_provider: non_empty_var("BENCHWARDEN_CLUSTER_PROVIDER"),
            cluster_version: non_empty_var("BENCHWARDEN_CLUSTER_VERSION"),
            scan_workers: non_empty_var("BENCHWARDEN_SCAN_WORKERS")
                .and_then(|s| s.parse().ok()),
            bench_command: non_empty_var("BENCHWARDEN_BENCH_COMMAND"),
            bench_args: parse_csv_var("BENCHWARDEN_BENCH_ARGS"),
            registration_timeout: non_empty_var("BENCHWARDEN_REGISTRATION_TIMEOUT"),
        }
    }
}
