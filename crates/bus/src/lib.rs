//! Custody Notification Bus
//!
//! The approval engine emits "challenge issued", "approval recorded" and
//! "quorum reached" events. Delivery (messaging, email) belongs to
//! subscribers; a failed delivery never rolls back engine state.
//!
//! - `Notifier`: synchronous, non-blocking hand-off used by the engine
//! - `BroadcastNotifier`: tokio broadcast channel fan-out
//! - `NotificationSubscriber` + `spawn_subscriber`: async delivery workers

pub mod channel;
pub mod error;
pub mod event;
pub mod subscriber;

pub use channel::{BroadcastNotifier, Notifier, NullNotifier, TracingNotifier};
pub use error::BusError;
pub use event::CustodyEvent;
pub use subscriber::{spawn_subscriber, NotificationSubscriber};
