//! One-time schema registration performed before any watch starts.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};

use crate::error::{Result, ScanError};
use crate::types::ResourceKind;

const READINESS_POLL: Duration = Duration::from_millis(50);

#[async_trait]
pub trait SchemaRegistrar: Send + Sync + fmt::Debug {
    /// Idempotent.
    async fn register(&self, kind: ResourceKind) -> Result<()>;
    async fn is_ready(&self, kind: ResourceKind) -> Result<bool>;
}

/// Registers every kind, then blocks until all report ready or `timeout`
/// elapses.
pub async fn ensure_registered(
    registrar: &dyn SchemaRegistrar,
    kinds: &[ResourceKind],
    timeout: Duration,
) -> Result<()> {
    for kind in kinds {
        registrar.register(*kind).await?;
        tracing::debug!(target: "scan::controller", %kind, "schema registration submitted");
    }

    let deadline = Instant::now() + timeout;
    let mut pending: Vec<ResourceKind> = kinds.to_vec();
    loop {
        let mut still_pending = Vec::new();
        for kind in pending {
            if !registrar.is_ready(kind).await? {
                still_pending.push(kind);
            }
        }
        if still_pending.is_empty() {
            tracing::info!(target: "scan::controller", kinds = kinds.len(), "resource schemas ready");
            return Ok(());
        }
        if Instant::now() >= deadline {
            let names: Vec<String> =
                still_pending.iter().map(ToString::to_string).collect();
            return Err(ScanError::Timeout(format!(
                "schemas not ready after {timeout:?}: {}",
                names.join(", ")
            )));
        }
        pending = still_pending;
        sleep(READINESS_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    struct SlowRegistrar {
        /// Polls remaining before a kind reports ready.
        countdown: Mutex<HashMap<ResourceKind, u32>>,
        never_ready: bool,
    }

    #[async_trait]
    impl SchemaRegistrar for SlowRegistrar {
        async fn register(&self, kind: ResourceKind) -> Result<()> {
            self.countdown.lock().entry(kind).or_insert(2);
            Ok(())
        }

        async fn is_ready(&self, kind: ResourceKind) -> Result<bool> {
            if self.never_ready {
                return Ok(false);
            }
            let mut countdown = self.countdown.lock();
            let left = countdown.entry(kind).or_insert(0);
            if *left == 0 {
                return Ok(true);
            }
            *left -= 1;
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_every_kind_is_ready() {
        let registrar = SlowRegistrar::default();
        ensure_registered(&registrar, &ResourceKind::ALL, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_a_kind_never_settles() {
        let registrar = SlowRegistrar {
            never_ready: true,
            ..Default::default()
        };
        let err = ensure_registered(
            &registrar,
            &ResourceKind::ALL,
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::Timeout(msg) if msg.contains("scan")));
    }
}
