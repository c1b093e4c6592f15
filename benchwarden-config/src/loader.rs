use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use benchwarden_core::environment::ProfileSelector;
use benchwarden_core::orchestration::ProcessRunnerSettings;
use benchwarden_core::types::{Cadence, ResourceKey, ScheduleDefinition};

use super::{
    models::{
        ClusterConfig, Config, ConfigMetadata, ConfigSource, RegistrationConfig,
        ServerConfig, default_profiles,
        sources::{EnvConfig, FileConfig, FileSchedule},
    },
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &[
    "benchwarden.toml",
    "benchwarden.json",
    "config/benchwarden.toml",
    "config/benchwarden.json",
];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Directory the well-known file names are resolved against.
    pub search_root: Option<PathBuf>,
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

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_search_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.options.search_root = Some(root.into());
        self
    }

    /// Reads `.env`, gathers the process environment, and resolves.
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

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Resolves against an already-gathered environment.
    ///
    /// Evaluation order for the file layer:
    /// 1) the explicit path from the options,
    /// 2) `$BENCHWARDEN_CONFIG_PATH` (TOML or JSON file),
    /// 3) `$BENCHWARDEN_CONFIG_JSON` (inline JSON),
    /// 4) the first existing well-known file,
    /// 5) defaults.
    ///
    /// Individual environment overrides then apply on top.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file, source) = self.load_file_config(&env)?;
        let (config, warnings) = compose_config(file, env, source)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, ConfigSource), ConfigLoadError> {
        if let Some(path) = &self.options.config_path {
            let file = read_required(path)?;
            return Ok((Some(file), ConfigSource::Explicit(path.clone())));
        }

        if let Some(path) = &env.config_path {
            let file = read_required(path)?;
            return Ok((Some(file), ConfigSource::EnvPath(path.clone())));
        }

        if let Some(raw) = &env.config_json {
            let file = serde_json::from_str(raw).map_err(|source| {
                ConfigLoadError::Json {
                    origin: "BENCHWARDEN_CONFIG_JSON".to_string(),
                    source,
                }
            })?;
            return Ok((Some(file), ConfigSource::EnvInline));
        }

        if let Some(path) = self.find_default_file() {
            tracing::debug!(path = %path.display(), "configuration file discovered");
            let file = read_required(&path)?;
            return Ok((Some(file), ConfigSource::File(path)));
        }

        Ok((None, ConfigSource::Default))
    }

    fn find_default_file(&self) -> Option<PathBuf> {
        let root = self
            .options
            .search_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        DEFAULT_CONFIG_LOCATIONS
            .iter()
            .map(|candidate| root.join(candidate))
            .find(|path| path.exists())
    }
}

fn read_required(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    if !path.exists() {
        return Err(ConfigLoadError::MissingConfig {
            path: path.to_path_buf(),
        });
    }
    let contents =
        fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse_file_config(&contents, path)
}

/// Parses by extension; unknown extensions try TOML, then JSON.
pub fn parse_file_config(
    contents: &str,
    path: &Path,
) -> Result<FileConfig, ConfigLoadError> {
    let origin = path.display().to_string();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(contents)
            .map_err(|source| ConfigLoadError::Json { origin, source }),
        Some("toml") | Some("tml") => toml::from_str(contents)
            .map_err(|source| ConfigLoadError::Toml { origin, source }),
        _ => toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                ConfigLoadError::Unrecognized {
                    origin,
                    toml: toml_err.to_string(),
                    json: json_err.to_string(),
                }
            })
        }),
    }
}

fn compose_config(
    file: Option<FileConfig>,
    env: EnvConfig,
    source: ConfigSource,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();
    if source == ConfigSource::Default {
        warnings.push_with_hint(
            "No benchwarden.toml detected; using built-in defaults",
            "Set BENCHWARDEN_CONFIG_PATH or pass --config to point at a configuration file",
        );
    }

    let FileConfig {
        server: file_server,
        reconciler: file_reconciler,
        runner: file_runner,
        cluster: file_cluster,
        profiles: file_profiles,
        selection: file_selection,
        schedules: file_schedules,
        registration: file_registration,
    } = file.unwrap_or_default();

    let server_defaults = ServerConfig::default();
    let server = ServerConfig {
        host: env
            .server_host
            .clone()
            .or(file_server.host)
            .unwrap_or(server_defaults.host),
        port: env
            .server_port
            .or(file_server.port)
            .unwrap_or(server_defaults.port),
    };

    let mut reconciler = file_reconciler.unwrap_or_default();
    if let Some(workers) = env.scan_workers {
        reconciler.controller.scan_workers = workers;
    }

    let runner_defaults = ProcessRunnerSettings::default();
    let runner = ProcessRunnerSettings {
        program: env
            .bench_command
            .clone()
            .or(file_runner.program)
            .unwrap_or(runner_defaults.program),
        args: env
            .bench_args
            .clone()
            .or(file_runner.args)
            .unwrap_or(runner_defaults.args),
        working_dir: file_runner.working_dir,
        env: file_runner.env,
        transition_capacity: runner_defaults.transition_capacity,
        finished_retention_secs: runner_defaults.finished_retention_secs,
    };

    let cluster_defaults = ClusterConfig::default();
    let cluster = ClusterConfig {
        provider: env
            .cluster_provider
            .clone()
            .or(file_cluster.provider)
            .unwrap_or(cluster_defaults.provider),
        version: env
            .cluster_version
            .clone()
            .or(file_cluster.version)
            .unwrap_or(cluster_defaults.version),
    };

    let profiles = file_profiles.unwrap_or_else(default_profiles);

    let selector_defaults = ProfileSelector::default();
    let selection = ProfileSelector {
        rules: file_selection.rules.unwrap_or(selector_defaults.rules),
        fallback: file_selection
            .fallback
            .unwrap_or(selector_defaults.fallback),
    };

    let schedules = file_schedules
        .into_iter()
        .map(seed_schedule)
        .collect::<Result<Vec<_>, _>>()?;

    let registration = RegistrationConfig {
        timeout: match env.registration_timeout.as_deref().or(file_registration.timeout.as_deref()) {
            Some(raw) => parse_duration("registration.timeout", raw)?,
            None => RegistrationConfig::default().timeout,
        },
    };

    let config = Config {
        server,
        reconciler,
        runner,
        cluster,
        profiles,
        selection,
        schedules,
        registration,
        metadata: ConfigMetadata {
            source,
            env_file_loaded: false,
        },
    };

    warnings.extend(validation::apply_guard_rails(&config)?);
    Ok((config, warnings))
}

fn seed_schedule(seed: FileSchedule) -> Result<ScheduleDefinition, ConfigLoadError> {
    let cadence = Cadence::parse(&seed.cadence).map_err(|err| {
        ConfigLoadError::InvalidSchedule {
            name: seed.name.clone(),
            reason: err.to_string(),
        }
    })?;
    let deadline_secs = match seed.deadline.as_deref() {
        Some(raw) => Some(parse_duration("schedules.deadline", raw)?.as_secs()),
        None => None,
    };

    let mut definition =
        ScheduleDefinition::new(ResourceKey::new(seed.scope, seed.name), cadence)
            .with_concurrency(seed.concurrency);
    definition.profile = seed.profile;
    definition.target = seed.target;
    definition.history_limit = seed.history_limit;
    definition.deadline_secs = deadline_secs;
    definition.suspended = seed.suspended;
    Ok(definition)
}

fn parse_duration(
    field: &'static str,
    raw: &str,
) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|source| {
        ConfigLoadError::InvalidDuration {
            field,
            value: raw.to_string(),
            source,
        }
    })
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
    #[error("failed to parse TOML configuration {origin}")]
    Toml {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse JSON configuration {origin}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(
        "failed to parse configuration {origin}: toml error: {toml}; json error: {json}"
    )]
    Unrecognized {
        origin: String,
        toml: String,
        json: String,
    },
    #[error("invalid duration '{value}' for {field}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("invalid seed schedule '{name}': {reason}")]
    InvalidSchedule { name: String, reason: String },
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
