use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Named, versioned bundle of checks handed to the scan worker.
///
/// A profile is resolved once when a run is opened and the resolved copy
/// travels with the run, so later catalog edits never reach in-flight scans.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScanProfile {
    pub name: String,
    /// Benchmark version passed to the worker (e.g. `cis-1.6`).
    pub benchmark_version: String,
    /// Check identifiers the worker is told to skip.
    #[serde(default)]
    pub skip_checks: Vec<String>,
}

impl ScanProfile {
    pub fn new(
        name: impl Into<String>,
        benchmark_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            benchmark_version: benchmark_version.into(),
            skip_checks: Vec::new(),
        }
    }

    pub fn with_skip_checks<I, S>(mut self, checks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_checks = checks.into_iter().map(Into::into).collect();
        self
    }
}

/// Lookup table of admitted profiles plus the default picked for this cluster.
#[derive(Clone, Debug, Default)]
pub struct ProfileCatalog {
    profiles: BTreeMap<String, ScanProfile>,
    default_profile: Option<String>,
}

impl ProfileCatalog {
    /// Builds a catalog, rejecting duplicate names.
    pub fn new<I>(profiles: I) -> Result<Self>
    where
        I: IntoIterator<Item = ScanProfile>,
    {
        let mut map = BTreeMap::new();
        for profile in profiles {
            let name = profile.name.clone();
            if map.insert(name.clone(), profile).is_some() {
                return Err(ScanError::InvalidProfile(format!(
                    "duplicate profile '{name}'"
                )));
            }
        }
        Ok(Self {
            profiles: map,
            default_profile: None,
        })
    }

    pub fn with_default(mut self, name: Option<String>) -> Self {
        self.default_profile = name;
        self
    }

    pub fn default_profile(&self) -> Option<&str> {
        self.default_profile.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&ScanProfile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Resolves an explicit reference, or the cluster default when `None`.
    pub fn resolve(&self, reference: Option<&str>) -> Result<ScanProfile> {
        let name = match reference {
            Some(name) => name,
            None => self.default_profile.as_deref().ok_or_else(|| {
                ScanError::InvalidProfile(
                    "no profile requested and no cluster default".into(),
                )
            })?,
        };
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| ScanError::InvalidProfile(name.to_string()))
    }
}
