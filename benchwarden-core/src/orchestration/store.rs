//! Declarative resource storage and change feed.
//!
//! Reconcilers own the status half of each record and are its only writers;
//! everyone else writes spec (admission, cancellation, deletion) or reads.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::error::{Result, ScanError};
use crate::registration::SchemaRegistrar;
use crate::types::{
    ResourceKey, ResourceKind, ScanRecord, ScanRequest, ScanStatus,
    ScheduleDefinition, ScheduleRecord, ScheduleStatus,
};

use super::events::{WatchChange, WatchEvent};

#[async_trait]
pub trait ResourceStore: Send + Sync + fmt::Debug {
    async fn admit_scan(&self, request: ScanRequest) -> Result<ScanRecord>;

    async fn get_scan(&self, key: &ResourceKey) -> Result<Option<ScanRecord>>;

    /// Replaces the status of an existing scan. Does not emit a watch event.
    async fn update_scan_status(
        &self,
        key: &ResourceKey,
        status: ScanStatus,
    ) -> Result<ScanRecord>;

    /// Sets the cancellation flag, the only mutable part of a request.
    async fn request_cancel(&self, key: &ResourceKey) -> Result<ScanRecord>;

    async fn delete_scan(&self, key: &ResourceKey) -> Result<Option<ScanRecord>>;

    async fn list_scans(&self) -> Result<Vec<ResourceKey>>;

    async fn admit_schedule(
        &self,
        definition: ScheduleDefinition,
    ) -> Result<ScheduleRecord>;

    async fn get_schedule(&self, key: &ResourceKey) -> Result<Option<ScheduleRecord>>;

    async fn update_schedule_status(
        &self,
        key: &ResourceKey,
        status: ScheduleStatus,
    ) -> Result<ScheduleRecord>;

    async fn delete_schedule(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<ScheduleRecord>>;

    async fn list_schedules(&self) -> Result<Vec<ResourceKey>>;

    /// Spec changes for `kind`, as `(identity, resource_version)` pairs.
    fn subscribe(&self, kind: ResourceKind) -> BoxStream<'static, WatchEvent>;
}

/// Process-local store backing single-node deployments and tests.
pub struct InMemoryResourceStore {
    scans: RwLock<BTreeMap<ResourceKey, ScanRecord>>,
    schedules: RwLock<BTreeMap<ResourceKey, ScheduleRecord>>,
    version: AtomicU64,
    watch: broadcast::Sender<WatchEvent>,
    registered: Mutex<HashSet<ResourceKind>>,
}

impl fmt::Debug for InMemoryResourceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryResourceStore")
            .field("scans", &self.scans.read().len())
            .field("schedules", &self.schedules.read().len())
            .field("version", &self.version.load(Ordering::Relaxed))
            .field("watchers", &self.watch.receiver_count())
            .finish()
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new(1_024)
    }
}

impl InMemoryResourceStore {
    pub fn new(watch_capacity: usize) -> Self {
        let (watch, _) = broadcast::channel(watch_capacity.max(1));
        Self {
            scans: RwLock::new(BTreeMap::new()),
            schedules: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            watch,
            registered: Mutex::new(HashSet::new()),
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(
        &self,
        kind: ResourceKind,
        key: &ResourceKey,
        resource_version: u64,
        change: WatchChange,
    ) {
        let _ = self.watch.send(WatchEvent {
            kind,
            key: key.clone(),
            resource_version,
            change,
        });
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn admit_scan(&self, request: ScanRequest) -> Result<ScanRecord> {
        let key = request.key.clone();
        let record = {
            let mut scans = self.scans.write();
            if scans.contains_key(&key) {
                return Err(ScanError::AlreadyExists(key));
            }
            let record = ScanRecord {
                request,
                status: ScanStatus::default(),
                resource_version: self.next_version(),
            };
            scans.insert(key.clone(), record.clone());
            record
        };
        self.notify(
            ResourceKind::ScanRequest,
            &key,
            record.resource_version,
            WatchChange::Applied,
        );
        Ok(record)
    }

    async fn get_scan(&self, key: &ResourceKey) -> Result<Option<ScanRecord>> {
        Ok(self.scans.read().get(key).cloned())
    }

    async fn update_scan_status(
        &self,
        key: &ResourceKey,
        status: ScanStatus,
    ) -> Result<ScanRecord> {
        let mut scans = self.scans.write();
        let record = scans
            .get_mut(key)
            .ok_or_else(|| ScanError::NotFound(format!("scan {key}")))?;
        record.status = status;
        record.resource_version = self.next_version();
        Ok(record.clone())
    }

    async fn request_cancel(&self, key: &ResourceKey) -> Result<ScanRecord> {
        let record = {
            let mut scans = self.scans.write();
            let record = scans
                .get_mut(key)
                .ok_or_else(|| ScanError::NotFound(format!("scan {key}")))?;
            if record.request.cancel_requested {
                return Ok(record.clone());
            }
            record.request.cancel_requested = true;
            record.resource_version = self.next_version();
            record.clone()
        };
        self.notify(
            ResourceKind::ScanRequest,
            key,
            record.resource_version,
            WatchChange::Applied,
        );
        Ok(record)
    }

    async fn delete_scan(&self, key: &ResourceKey) -> Result<Option<ScanRecord>> {
        let removed = self.scans.write().remove(key);
        if removed.is_some() {
            let version = self.next_version();
            self.notify(ResourceKind::ScanRequest, key, version, WatchChange::Deleted);
        }
        Ok(removed)
    }

    async fn list_scans(&self) -> Result<Vec<ResourceKey>> {
        Ok(self.scans.read().keys().cloned().collect())
    }

    async fn admit_schedule(
        &self,
        definition: ScheduleDefinition,
    ) -> Result<ScheduleRecord> {
        let key = definition.key.clone();
        let record = {
            let mut schedules = self.schedules.write();
            if schedules.contains_key(&key) {
                return Err(ScanError::AlreadyExists(key));
            }
            let record = ScheduleRecord {
                definition,
                status: ScheduleStatus::default(),
                resource_version: self.next_version(),
            };
            schedules.insert(key.clone(), record.clone());
            record
        };
        self.notify(
            ResourceKind::ScheduleDefinition,
            &key,
            record.resource_version,
            WatchChange::Applied,
        );
        Ok(record)
    }

    async fn get_schedule(&self, key: &ResourceKey) -> Result<Option<ScheduleRecord>> {
        Ok(self.schedules.read().get(key).cloned())
    }

    async fn update_schedule_status(
        &self,
        key: &ResourceKey,
        status: ScheduleStatus,
    ) -> Result<ScheduleRecord> {
        let mut schedules = self.schedules.write();
        let record = schedules
            .get_mut(key)
            .ok_or_else(|| ScanError::NotFound(format!("schedule {key}")))?;
        record.status = status;
        record.resource_version = self.next_version();
        Ok(record.clone())
    }

    async fn delete_schedule(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<ScheduleRecord>> {
        let removed = self.schedules.write().remove(key);
        if removed.is_some() {
            let version = self.next_version();
            self.notify(
                ResourceKind::ScheduleDefinition,
                key,
                version,
                WatchChange::Deleted,
            );
        }
        Ok(removed)
    }

    async fn list_schedules(&self) -> Result<Vec<ResourceKey>> {
        Ok(self.schedules.read().keys().cloned().collect())
    }

    fn subscribe(&self, kind: ResourceKind) -> BoxStream<'static, WatchEvent> {
        BroadcastStream::new(self.watch.subscribe())
            .filter_map(move |item| async move {
                match item {
                    Ok(event) if event.kind == kind => Some(event),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            target: "scan::controller",
                            %kind,
                            skipped,
                            "watch subscriber lagged; relying on resync"
                        );
                        None
                    }
                }
            })
            .boxed()
    }
}

#[async_trait]
impl SchemaRegistrar for InMemoryResourceStore {
    async fn register(&self, kind: ResourceKind) -> Result<()> {
        self.registered.lock().insert(kind);
        Ok(())
    }

    async fn is_ready(&self, kind: ResourceKind) -> Result<bool> {
        Ok(self.registered.lock().contains(&kind))
    }
}
