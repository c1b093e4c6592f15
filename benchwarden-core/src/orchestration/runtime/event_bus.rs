use async_trait::async_trait;
use std::fmt;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::orchestration::events::{ScanEvent, ScanEventPublisher, ScanEventStream};

/// In-process fan-out of scan lifecycle events to observers (status
/// streams, tests). Publishing never fails; events are dropped when nobody
/// listens.
pub struct InProcEventBus {
    sender: broadcast::Sender<ScanEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcEventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ScanEventPublisher for InProcEventBus {
    async fn publish_scan_event(&self, event: ScanEvent) -> Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }
}

impl ScanEventStream for InProcEventBus {
    fn subscribe_scan(&self) -> broadcast::Receiver<ScanEvent> {
        self.subscribe()
    }
}
