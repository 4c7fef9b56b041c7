//! Per-client writer task.
//!
//! The only caller of a client's [`FrameSink`]: frames from broadcasts and
//! heartbeats arrive through one queue and are written strictly one at a time.
//! The task ends when the client's token is cancelled or a write fails; a
//! failed write removes the client immediately.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use crate::frame::EventFrame;
use crate::registry::{ClientRecord, Registry, RemovalReason};
use crate::sink::{FrameSink, SendError};

pub(crate) async fn run(
    registry: Weak<Registry>,
    record: Arc<ClientRecord>,
    mut rx: mpsc::Receiver<EventFrame>,
    sink: Arc<dyn FrameSink>,
    send_timeout: Duration,
) {
    let cancel = record.cancel_token().clone();

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = tokio::time::timeout(send_timeout, sink.send(&frame)) => {
                res.unwrap_or(Err(SendError::TimedOut(send_timeout)))
            }
        };

        match outcome {
            Ok(()) => {
                record.touch();
                trace!(client_id = %record.id(), event = %frame.event_type(), "frame written");
            }
            Err(err) => {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(record.id(), RemovalReason::SendFailed(err));
                }
                break;
            }
        }
    }

    trace!(client_id = %record.id(), "writer stopped");
}
