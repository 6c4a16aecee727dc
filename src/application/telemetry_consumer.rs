// Consumer interface for link events
use crate::domain::link::{FaultKind, LinkEvent};
use crate::domain::telemetry::TelemetryRecord;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Receives link events in stream order from a single dispatcher.
#[async_trait]
pub trait TelemetryConsumer: Send + Sync {
    /// A validated record, delivered after it entered the window.
    async fn on_telemetry(&self, record: &TelemetryRecord);

    /// A process-level fault. Decode faults never arrive here.
    async fn on_error(&self, kind: FaultKind, message: &str);
}

/// Fans link events out to any number of broadcast receivers.
#[derive(Debug, Clone)]
pub struct BroadcastConsumer {
    sender: broadcast::Sender<LinkEvent>,
}

impl BroadcastConsumer {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: LinkEvent) {
        // No receivers is fine; events are only kept for live subscribers.
        let _ = self.sender.send(event);
    }
}

#[async_trait]
impl TelemetryConsumer for BroadcastConsumer {
    async fn on_telemetry(&self, record: &TelemetryRecord) {
        self.publish(LinkEvent::Telemetry(*record));
    }

    async fn on_error(&self, kind: FaultKind, message: &str) {
        self.publish(LinkEvent::fault(kind, message));
    }
}
