//! Cluster provider/version detection and default-profile selection.
//!
//! Detection runs once at startup. The result only feeds
//! [`ProfileSelector::select`]; reconcilers never query it again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

#[async_trait]
pub trait ClusterEnvironment: Send + Sync + fmt::Debug {
    async fn detect_provider(&self) -> Result<String>;
    async fn detect_version(&self) -> Result<String>;
}

/// Environment with fixed answers, typically filled from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticEnvironment {
    provider: String,
    version: String,
}

impl StaticEnvironment {
    pub fn new(provider: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            version: version.into(),
        }
    }
}

#[async_trait]
impl ClusterEnvironment for StaticEnvironment {
    async fn detect_provider(&self) -> Result<String> {
        Ok(self.provider.clone())
    }

    async fn detect_version(&self) -> Result<String> {
        Ok(self.version.clone())
    }
}

/// Detected cluster identity.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub provider: String,
    pub version: String,
}

impl ClusterInfo {
    pub async fn detect(environment: &dyn ClusterEnvironment) -> Result<Self> {
        let provider = environment.detect_provider().await?;
        tracing::info!(target: "scan::controller", %provider, "cluster provider detected");
        let version = environment.detect_version().await?;
        tracing::info!(target: "scan::controller", %version, "cluster version detected");
        Ok(Self { provider, version })
    }
}

/// Maps a provider (and optionally a version prefix) to a profile name.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SelectionRule {
    /// Case-insensitive provider match; `None` matches any provider.
    #[serde(default)]
    pub provider: Option<String>,
    /// Matches when the detected version starts with this (a leading `v`
    /// on either side is ignored).
    #[serde(default)]
    pub version_prefix: Option<String>,
    pub profile: String,
}

impl SelectionRule {
    pub fn for_provider(
        provider: impl Into<String>,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            provider: Some(provider.into()),
            version_prefix: None,
            profile: profile.into(),
        }
    }

    fn matches(&self, cluster: &ClusterInfo) -> bool {
        let provider_ok = self
            .provider
            .as_deref()
            .is_none_or(|p| p.eq_ignore_ascii_case(&cluster.provider));
        let version_ok = self.version_prefix.as_deref().is_none_or(|prefix| {
            strip_v(&cluster.version).starts_with(strip_v(prefix))
        });
        provider_ok && version_ok
    }
}

fn strip_v(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// First matching rule wins; otherwise `fallback`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProfileSelector {
    #[serde(default)]
    pub rules: Vec<SelectionRule>,
    pub fallback: String,
}

impl Default for ProfileSelector {
    fn default() -> Self {
        Self {
            rules: vec![
                SelectionRule::for_provider("rke", "rke-profile-permissive"),
                SelectionRule::for_provider("eks", "eks-profile"),
                SelectionRule::for_provider("gke", "gke-profile"),
            ],
            fallback: "cis-1.6-profile".to_string(),
        }
    }
}

impl ProfileSelector {
    pub fn select(&self, cluster: &ClusterInfo) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.matches(cluster))
            .map(|rule| rule.profile.as_str())
            .unwrap_or(&self.fallback)
    }

    /// Profile names mentioned anywhere in the selector.
    pub fn referenced_profiles(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .map(|rule| rule.profile.as_str())
            .chain(std::iter::once(self.fallback.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(provider: &str, version: &str) -> ClusterInfo {
        ClusterInfo {
            provider: provider.into(),
            version: version.into(),
        }
    }

    #[test]
    fn default_rules_pick_provider_profiles() {
        let selector = ProfileSelector::default();
        assert_eq!(
            selector.select(&cluster("RKE", "v1.20.4")),
            "rke-profile-permissive"
        );
        assert_eq!(selector.select(&cluster("eks", "v1.19.8")), "eks-profile");
        assert_eq!(selector.select(&cluster("k3s", "v1.20.4")), "cis-1.6-profile");
    }

    #[test]
    fn version_prefix_narrows_and_first_match_wins() {
        let selector = ProfileSelector {
            rules: vec![
                SelectionRule {
                    provider: Some("rke2".into()),
                    version_prefix: Some("1.18".into()),
                    profile: "rke2-cis-1.5".into(),
                },
                SelectionRule::for_provider("rke2", "rke2-cis-1.6"),
            ],
            fallback: "cis-1.6-profile".into(),
        };
        assert_eq!(selector.select(&cluster("rke2", "v1.18.12")), "rke2-cis-1.5");
        assert_eq!(selector.select(&cluster("rke2", "v1.20.1")), "rke2-cis-1.6");
    }

    #[tokio::test]
    async fn detection_reads_static_environment() {
        let env = StaticEnvironment::new("gke", "v1.21.0");
        let info = ClusterInfo::detect(&env).await.unwrap();
        assert_eq!(info, cluster("gke", "v1.21.0"));
    }
}
