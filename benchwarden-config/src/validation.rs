use std::collections::BTreeSet;
use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("controller.{pool} must be at least 1")]
    ZeroWorkers { pool: &'static str },
    #[error("profile '{name}' is defined more than once")]
    DuplicateProfile { name: String },
    #[error("seed schedule '{name}' references unknown profile '{profile}'")]
    UnknownScheduleProfile { name: String, profile: String },
    #[error("seed schedule '{name}' is defined more than once")]
    DuplicateSchedule { name: String },
    #[error("runner program must not be empty")]
    EmptyCommand,
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

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let reconciler = &config.reconciler;

    if reconciler.retry.max_attempts == 0 {
        return Err(ConfigGuardRailError::ZeroAttempts);
    }
    if reconciler.controller.scan_workers == 0 {
        return Err(ConfigGuardRailError::ZeroWorkers {
            pool: "scan_workers",
        });
    }
    if reconciler.controller.schedule_workers == 0 {
        return Err(ConfigGuardRailError::ZeroWorkers {
            pool: "schedule_workers",
        });
    }
    if config.runner.program.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyCommand);
    }

    let mut names = BTreeSet::new();
    for profile in &config.profiles {
        if !names.insert(profile.name.as_str()) {
            return Err(ConfigGuardRailError::DuplicateProfile {
                name: profile.name.clone(),
            });
        }
    }

    let mut schedules = BTreeSet::new();
    for schedule in &config.schedules {
        if !schedules.insert(&schedule.key) {
            return Err(ConfigGuardRailError::DuplicateSchedule {
                name: schedule.key.to_string(),
            });
        }
        if let Some(profile) = &schedule.profile
            && !names.contains(profile.as_str())
        {
            return Err(ConfigGuardRailError::UnknownScheduleProfile {
                name: schedule.key.to_string(),
                profile: profile.clone(),
            });
        }
    }

    for referenced in config.selection.referenced_profiles() {
        if !names.contains(referenced) {
            warnings.push_with_hint(
                format!("profile selection names unknown profile '{referenced}'"),
                "Scans on clusters matching this rule fail with an invalid profile unless they name one explicitly",
            );
        }
    }

    let timeouts = &reconciler.timeouts;
    if timeouts.scan_timeout() < timeouts.poll_interval() {
        warnings.push(format!(
            "scan timeout ({}s) is shorter than the poll interval ({}ms)",
            timeouts.scan_timeout_secs, timeouts.poll_interval_ms
        ));
    }
    if reconciler.controller.resync_interval().is_none() {
        warnings.push_with_hint(
            "periodic resync disabled",
            "Missed watch events are only recovered on restart",
        );
    }
    if reconciler.retry.backoff_base_ms > reconciler.retry.backoff_max_ms {
        warnings.push(format!(
            "retry backoff base ({}ms) exceeds its cap ({}ms); every retry waits the cap",
            reconciler.retry.backoff_base_ms, reconciler.retry.backoff_max_ms
        ));
    }

    Ok(warnings)
}
