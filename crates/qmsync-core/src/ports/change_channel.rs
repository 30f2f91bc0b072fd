//! Change channel port (driven/secondary port)
//!
//! Transport for [`ChangeNotice`]s between contexts. The notification
//! contract is fixed; the transport is not: a shared database, an in-memory
//! bus in tests, or a socket could all implement it.
//!
//! ## Design Notes
//!
//! - Delivery is best-effort and at-least-once. Subscribers must treat a
//!   duplicate notice as harmless.
//! - `subscribe` hands out a `tokio::sync::broadcast::Receiver`; a lagging
//!   receiver loses the oldest notices, which is acceptable because a notice
//!   only asks for a re-read.

use tokio::sync::broadcast;

use crate::domain::ChangeNotice;

/// Port trait for publishing and observing change notices
#[async_trait::async_trait]
pub trait IChangeChannel: Send + Sync {
    /// Publishes a notice to every other context
    async fn publish(&self, notice: &ChangeNotice) -> anyhow::Result<()>;

    /// Returns a receiver of notices published by other contexts
    fn subscribe(&self) -> broadcast::Receiver<ChangeNotice>;
}
