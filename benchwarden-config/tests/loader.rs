use std::fs;
use std::time::Duration;

use benchwarden_config::{
    ConfigGuardRailError, ConfigLoadError, ConfigLoader, ConfigSource, EnvConfig,
};
use benchwarden_core::types::ConcurrencyPolicy;
use tempfile::TempDir;

fn isolated() -> (TempDir, ConfigLoader) {
    let dir = tempfile::tempdir().expect("tempdir");
    let loader = ConfigLoader::new().with_search_root(dir.path());
    (dir, loader)
}

#[test]
fn defaults_apply_without_any_source() {
    let (_dir, loader) = isolated();
    let load = loader.load_with_env(EnvConfig::default()).unwrap();

    let config = load.config;
    assert_eq!(config.metadata.source, ConfigSource::Default);
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.reconciler.retry.max_attempts, 3);
    assert_eq!(config.runner.program, "kube-bench");
    assert_eq!(config.selection.fallback, "cis-1.6-profile");
    assert!(config.profile_catalog().unwrap().get("eks-profile").is_some());
    assert!(
        load.warnings
            .iter()
            .any(|w| w.message.contains("No benchwarden.toml"))
    );
}

#[test]
fn well_known_toml_file_is_discovered() {
    let (dir, loader) = isolated();
    fs::write(
        dir.path().join("benchwarden.toml"),
        r#"
[server]
port = 9400

[reconciler.retry]
max_attempts = 5

[reconciler.controller]
scan_workers = 8

[cluster]
provider = "rke"
version = "v1.21.4"

[registration]
timeout = "90s"

[[schedules]]
name = "nightly"
cadence = "0 2 * * *"
concurrency = "replace"
deadline = "30m"
"#,
    )
    .unwrap();

    let load = loader.load_with_env(EnvConfig::default()).unwrap();
    let config = load.config;

    assert!(matches!(config.metadata.source, ConfigSource::File(_)));
    assert_eq!(config.server.port, 9400);
    assert_eq!(config.reconciler.retry.max_attempts, 5);
    // Untouched sections keep their defaults.
    assert_eq!(config.reconciler.retry.backoff_base_ms, 2_000);
    assert_eq!(config.reconciler.controller.scan_workers, 8);
    assert_eq!(config.cluster.provider, "rke");
    assert_eq!(config.registration.timeout, Duration::from_secs(90));

    let schedule = &config.schedules[0];
    assert_eq!(schedule.key.scope, "default");
    assert_eq!(schedule.concurrency, ConcurrencyPolicy::Replace);
    assert_eq!(schedule.deadline_secs, Some(1_800));
}

#[test]
fn env_path_beats_inline_json_and_env_values_override_the_file() {
    let (dir, loader) = isolated();
    let path = dir.path().join("custom.json");
    fs::write(
        &path,
        r#"{ "server": { "host": "127.0.0.1", "port": 9000 }, "cluster": { "provider": "eks" } }"#,
    )
    .unwrap();

    let env = EnvConfig {
        config_path: Some(path.clone()),
        config_json: Some(r#"{ "server": { "port": 1 } }"#.into()),
        server_port: Some(9500),
        scan_workers: Some(2),
        bench_command: Some("/opt/bin/kube-bench".into()),
        ..EnvConfig::default()
    };
    let config = loader.load_with_env(env).unwrap().config;

    assert_eq!(config.metadata.source, ConfigSource::EnvPath(path));
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9500);
    assert_eq!(config.cluster.provider, "eks");
    assert_eq!(config.reconciler.controller.scan_workers, 2);
    assert_eq!(config.runner.program, "/opt/bin/kube-bench");
}

#[test]
fn inline_json_is_used_when_no_path_is_set() {
    let (_dir, loader) = isolated();
    let env = EnvConfig {
        config_json: Some(
            r#"{ "profiles": [ { "name": "custom", "benchmark_version": "cis-1.20" } ],
                 "selection": { "rules": [], "fallback": "custom" } }"#
                .into(),
        ),
        ..EnvConfig::default()
    };
    let load = loader.load_with_env(env).unwrap();

    assert_eq!(load.config.metadata.source, ConfigSource::EnvInline);
    assert_eq!(load.config.profiles.len(), 1);
    assert!(load.warnings.is_empty(), "{:?}", load.warnings);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let (dir, _) = isolated();
    let loader = ConfigLoader::new().with_config_path(dir.path().join("absent.toml"));
    let err = loader.load_with_env(EnvConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn guard_rails_reject_fatal_settings() {
    let (dir, loader) = isolated();
    let path = dir.path().join("benchwarden.toml");

    fs::write(&path, "[reconciler.retry]\nmax_attempts = 0\n").unwrap();
    let err = loader.load_with_env(EnvConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::ZeroAttempts)
    ));

    fs::write(
        &path,
        r#"
[[profiles]]
name = "dup"
benchmark_version = "cis-1.6"

[[profiles]]
name = "dup"
benchmark_version = "cis-1.5"
"#,
    )
    .unwrap();
    let err = loader.load_with_env(EnvConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::DuplicateProfile { .. })
    ));

    fs::write(
        &path,
        "[[schedules]]\nname = \"bad\"\ncadence = \"every tuesday\"\n",
    )
    .unwrap();
    let err = loader.load_with_env(EnvConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigLoadError::InvalidSchedule { .. }));
}

#[test]
fn questionable_settings_only_warn() {
    let (dir, loader) = isolated();
    fs::write(
        dir.path().join("benchwarden.toml"),
        r#"
[reconciler.timeouts]
scan_timeout_secs = 1
poll_interval_ms = 5000

[selection]
fallback = "does-not-exist"
"#,
    )
    .unwrap();

    let load = loader.load_with_env(EnvConfig::default()).unwrap();
    let messages: Vec<&str> = load.warnings.iter().map(|w| w.message.as_str()).collect();
    assert!(messages.iter().any(|m| m.contains("does-not-exist")));
    assert!(messages.iter().any(|m| m.contains("poll interval")));
}

#[test]
fn bad_durations_are_reported_with_their_field() {
    let (_dir, loader) = isolated();
    let env = EnvConfig {
        registration_timeout: Some("soon".into()),
        ..EnvConfig::default()
    };
    let err = loader.load_with_env(env).unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::InvalidDuration {
            field: "registration.timeout",
            ..
        }
    ));
}
