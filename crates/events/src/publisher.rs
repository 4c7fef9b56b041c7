//! Publish-side contract for mutation collaborators.
//!
//! Code that commits data changes depends on [`ChangePublisher`] rather than on
//! the notifier itself:
//!
//! ```text
//! mutation handler → commit → ChangePublisher::publish → subscribers
//! ```
//!
//! ## Delivery
//!
//! - **Best-effort**: no retry, no durable queue, nothing replayed after restart
//! - **At-most-once** per event per subscriber
//! - **Infallible for the caller**: a subscriber failure is handled inside the
//!   notifier and never turns a successful mutation into an error
//!
//! Call it only after the mutation has committed.

use std::sync::Arc;

use stockwire_core::ChangeEvent;

use crate::broadcaster::PublishReport;

pub trait ChangePublisher: Send + Sync {
    fn publish(&self, event: ChangeEvent) -> PublishReport;
}

impl<P> ChangePublisher for Arc<P>
where
    P: ChangePublisher + ?Sized,
{
    fn publish(&self, event: ChangeEvent) -> PublishReport {
        (**self).publish(event)
    }
}
