//! Notification bus errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Failed to send event: {0}")]
    SendFailed(String),

    #[error("Subscriber '{name}' failed: {reason}")]
    SubscriberFailed { name: String, reason: String },
}
