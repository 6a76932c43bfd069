//! Notifiers used by the engine

use crate::error::BusError;
use crate::event::CustodyEvent;
use tokio::sync::broadcast;

/// Hand-off point for engine events.
///
/// Implementations must not block; the engine logs and ignores errors.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &CustodyEvent) -> Result<(), BusError>;
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: &CustodyEvent) -> Result<(), BusError> {
        Ok(())
    }
}

/// Logs every event at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &CustodyEvent) -> Result<(), BusError> {
        tracing::info!(
            event = event.name(),
            transaction_id = event.transaction_id().map(|id| id.as_str()).unwrap_or("-"),
            "notification"
        );
        Ok(())
    }
}

/// Fan-out over a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest events rather than blocking the
/// engine.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<CustodyEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CustodyEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: &CustodyEvent) -> Result<(), BusError> {
        // No subscribers is not a failure: nobody is listening yet
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(event.clone())
            .map(|_| ())
            .map_err(|e| BusError::SendFailed(e.to_string()))
    }
}
