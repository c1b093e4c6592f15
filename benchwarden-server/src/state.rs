use std::{fmt, sync::Arc};

use benchwarden_core::{
    environment::ClusterInfo,
    metrics::MetricsAggregator,
    orchestration::{JobRunner, ResourceStore},
    types::ProfileCatalog,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ResourceStore>,
    /// Same runner the controllers submit to.
    pub runner: Arc<dyn JobRunner>,
    pub metrics: Arc<MetricsAggregator>,
    pub profiles: Arc<ProfileCatalog>,
    pub cluster: Arc<ClusterInfo>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store)
            .field("runner", &self.runner)
            .field("profiles", &self.profiles.len())
            .field("cluster", &self.cluster)
            .finish_non_exhaustive()
    }
}
