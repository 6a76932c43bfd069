//! Async delivery workers

use crate::error::BusError;
use crate::event::CustodyEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Delivers notifications to guardians (messaging, email, ...).
///
/// Handlers should be idempotent; the bus gives at-most-once delivery.
#[async_trait]
pub trait NotificationSubscriber: Send + Sync {
    /// Subscriber name (for logging)
    fn name(&self) -> &str;

    async fn handle(&self, event: &CustodyEvent) -> Result<(), BusError>;
}

/// Drive a subscriber from a broadcast receiver until the channel closes.
///
/// Delivery failures are logged and skipped.
pub fn spawn_subscriber(
    mut receiver: broadcast::Receiver<CustodyEvent>,
    subscriber: Arc<dyn NotificationSubscriber>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = subscriber.handle(&event).await {
                        tracing::warn!(
                            subscriber = subscriber.name(),
                            event = event.name(),
                            error = %e,
                            "notification delivery failed"
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(subscriber = subscriber.name(), skipped, "subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
