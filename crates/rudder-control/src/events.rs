//! Unified platform event stream
//!
//! Resolver, release manager and dispatcher all publish on one broadcast
//! channel owned by the aggregator.

use rudder_types::{EventSource, RudderEvent, RudderEventEnvelope, WorkspaceId};
use tokio::sync::broadcast;
use tracing::debug;

/// Channel capacity for the unified event stream
pub const EVENT_CHANNEL_CAPACITY: usize = 16384;

#[derive(Clone)]
pub struct EventAggregator {
    unified_tx: broadcast::Sender<RudderEventEnvelope>,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (unified_tx, _) = broadcast::channel(capacity.max(1));
        Self { unified_tx }
    }

    /// Sender handed to subsystems
    pub fn sender(&self) -> broadcast::Sender<RudderEventEnvelope> {
        self.unified_tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RudderEventEnvelope> {
        self.unified_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.unified_tx.receiver_count()
    }

    /// Emit an event on behalf of the control plane
    pub fn emit(&self, event: RudderEvent, source: EventSource, workspace_id: Option<WorkspaceId>) {
        let mut envelope = RudderEventEnvelope::new(event, source);
        if let Some(workspace_id) = workspace_id {
            envelope = envelope.with_workspace(workspace_id);
        }
        debug!(event_id = %envelope.id, source = ?source, "Emitting event");
        // No subscribers is fine
        let _ = self.unified_tx.send(envelope);
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}
