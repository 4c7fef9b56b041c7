//! Event fan-out.
//!
//! `publish` takes a registry snapshot and hands the frame to every client's
//! writer queue with a non-blocking enqueue. It never waits on a transport, so
//! it returns promptly regardless of how many subscribers are slow or dead.
//!
//! - Best-effort, at-most-once per event per client; no retry.
//! - A closed queue removes the client on the spot.
//! - A full queue drops the frame for that client only. The client is removed
//!   instead when it has also gone `stale_timeout` without a successful write.
//! - Fan-outs are sequenced: every client sees frames in one global order.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use stockwire_core::ChangeEvent;

use crate::frame::EventFrame;
use crate::registry::{Registry, RemovalReason};
use crate::sink::SendError;

/// Outcome of one fan-out. Informational only; never an error.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Clients whose queue accepted the frame
    pub delivered: usize,
    /// Clients still writing earlier frames; this one was skipped for them
    pub dropped: usize,
    /// Clients removed because the hand-off failed
    pub evicted: usize,
}

#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    order: Mutex<()>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            order: Mutex::new(()),
        }
    }

    /// Fan a committed mutation out to every subscriber as an `update` frame.
    pub fn publish(&self, event: &ChangeEvent) -> PublishReport {
        let report = self.fan_out(EventFrame::update(event));
        debug!(
            table = %event.table,
            operation = %event.operation,
            key = %event.key,
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted,
            "change published"
        );
        report
    }

    /// Hand `frame` to every client in the current snapshot.
    pub fn fan_out(&self, frame: EventFrame) -> PublishReport {
        // Only held across non-blocking enqueues.
        let _order = self.order.lock().unwrap_or_else(PoisonError::into_inner);

        let clients = self.registry.snapshot();
        let stale_timeout = self.registry.stale_timeout();
        let now = Instant::now();
        let mut report = PublishReport::default();

        for client in clients {
            match client.enqueue(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(SendError::QueueFull) if client.idle_for(now) <= stale_timeout => {
                    report.dropped += 1;
                    debug!(
                        client_id = %client.id(),
                        event = %frame.event_type(),
                        "client queue full; frame dropped"
                    );
                }
                Err(err) => {
                    if self.registry.remove(client.id(), RemovalReason::SendFailed(err)) {
                        report.evicted += 1;
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stockwire_core::Table;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::NotifierConfig;
    use crate::frame::EventType;
    use crate::sink::test_sinks::{FailingSink, RecordingSink, StalledSink};

    fn setup(cfg: &NotifierConfig) -> (Arc<Registry>, Broadcaster) {
        let registry = Registry::new(cfg, CancellationToken::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        (registry, broadcaster)
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn publish_to_empty_registry_is_noop() {
        let (registry, broadcaster) = setup(&NotifierConfig::default());

        let report = broadcaster.publish(&ChangeEvent::created(Table::Items, 1));

        assert_eq!(report, PublishReport::default());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn publish_reaches_every_client() {
        let (registry, broadcaster) = setup(&NotifierConfig::default());
        let sinks: Vec<_> = (0..3).map(|_| RecordingSink::new()).collect();
        for sink in &sinks {
            registry.register(sink.clone());
        }

        let report = broadcaster.publish(&ChangeEvent::deleted(Table::Distributors, 5));
        assert_eq!(report.delivered, 3);

        wait_for(|| sinks.iter().all(|s| s.count_of(EventType::Update) == 1)).await;
        let frame = &sinks[0].frames()[0];
        assert_eq!(frame.payload()["table"], "distributors");
        assert_eq!(frame.payload()["operation"], "delete");
    }

    #[tokio::test]
    async fn failing_client_does_not_affect_others() {
        let (registry, broadcaster) = setup(&NotifierConfig::default());
        let good = RecordingSink::new();
        let good_id = registry.register(good.clone());
        let bad_id = registry.register(FailingSink::new());

        broadcaster.publish(&ChangeEvent::updated(Table::Inventory, 1));
        wait_for(|| !registry.contains(bad_id)).await;

        broadcaster.publish(&ChangeEvent::updated(Table::Inventory, 2));
        wait_for(|| good.count_of(EventType::Update) == 2).await;

        assert!(registry.contains(good_id));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn burst_larger_than_queue_keeps_healthy_client() {
        let (registry, broadcaster) = setup(&NotifierConfig::default());
        let sink = RecordingSink::new();
        let id = registry.register(sink.clone());

        // No yield: the writer cannot drain while the burst runs.
        let mut total = PublishReport::default();
        for key in 0..100 {
            let report = broadcaster.publish(&ChangeEvent::updated(Table::Inventory, key));
            total.delivered += report.delivered;
            total.dropped += report.dropped;
            total.evicted += report.evicted;
        }

        assert_eq!(total.evicted, 0);
        assert_eq!(total.delivered, 64);
        assert_eq!(total.dropped, 36);
        assert!(registry.contains(id));

        wait_for(|| sink.count_of(EventType::Update) == 64).await;
        assert_eq!(
            broadcaster
                .publish(&ChangeEvent::updated(Table::Inventory, 100))
                .delivered,
            1
        );
        wait_for(|| sink.count_of(EventType::Update) == 65).await;
        assert!(registry.contains(id));
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_of_stalled_client_evicts_once_stale() {
        let cfg = NotifierConfig::default()
            .with_client_queue_capacity(2)
            .with_send_timeout(Duration::from_secs(3600));
        let (registry, broadcaster) = setup(&cfg);
        let stalled = registry.register(StalledSink::new());
        let healthy = registry.register(RecordingSink::new());

        // Writer holds one frame in flight; the queue then fills.
        let mut total = PublishReport::default();
        for key in 0..10 {
            let report = broadcaster.publish(&ChangeEvent::updated(Table::Inventory, key));
            total.dropped += report.dropped;
            total.evicted += report.evicted;
            tokio::task::yield_now().await;
        }
        assert_eq!(total.evicted, 0);
        assert!(total.dropped > 0);
        assert!(registry.contains(stalled));

        // Keep the healthy client's activity fresh while the stalled one ages.
        tokio::time::advance(cfg.stale_timeout + Duration::from_secs(1)).await;
        registry.get(healthy).unwrap().touch();

        let report = broadcaster.publish(&ChangeEvent::updated(Table::Inventory, 10));
        assert_eq!(report.evicted, 1);
        assert!(!registry.contains(stalled));
        assert!(registry.contains(healthy));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_publishes_arrive_in_one_order() {
        let (registry, broadcaster) = setup(&NotifierConfig::default());
        let broadcaster = Arc::new(broadcaster);
        let sinks: Vec<_> = (0..25).map(|_| RecordingSink::new()).collect();
        for sink in &sinks {
            registry.register(sink.clone());
        }

        let a = {
            let b = Arc::clone(&broadcaster);
            tokio::spawn(async move { b.publish(&ChangeEvent::created(Table::Items, 100)) })
        };
        let b = {
            let b = Arc::clone(&broadcaster);
            tokio::spawn(async move { b.publish(&ChangeEvent::created(Table::Items, 200)) })
        };
        assert_eq!(a.await.unwrap().delivered, 25);
        assert_eq!(b.await.unwrap().delivered, 25);

        wait_for(|| sinks.iter().all(|s| s.frames().len() == 2)).await;

        let order = |sink: &Arc<RecordingSink>| -> Vec<i64> {
            sink.frames()
                .iter()
                .map(|f| f.payload()["key"].as_i64().unwrap())
                .collect()
        };
        let first = order(&sinks[0]);
        assert_eq!(first.len(), 2);
        assert!(first.contains(&100) && first.contains(&200));
        assert!(sinks.iter().all(|s| order(s) == first));
    }
}
