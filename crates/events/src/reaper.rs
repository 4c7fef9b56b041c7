//! Stale client reaper.
//!
//! Slow safety-net path: catches connections whose failure is never surfaced
//! by a write error (e.g. a peer that stops reading but keeps the socket open).
//! Every `reaper_interval` it scans a snapshot and evicts clients idle for
//! longer than `stale_timeout`, or older than `max_connection_age` when that
//! cap is configured.
//!
//! Worst case a client that blocks without failing is evicted within
//! `reaper_interval + stale_timeout` of its last successful write.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use stockwire_core::ClientId;

use crate::config::NotifierConfig;
use crate::registry::{Registry, RemovalReason};

#[derive(Debug)]
pub struct Reaper {
    registry: Arc<Registry>,
    interval: Duration,
    stale_timeout: Duration,
    max_connection_age: Option<Duration>,
}

impl Reaper {
    pub fn new(registry: Arc<Registry>, config: &NotifierConfig) -> Self {
        Self {
            registry,
            interval: config.reaper_interval,
            stale_timeout: config.stale_timeout,
            max_connection_age: config.max_connection_age,
        }
    }

    /// One pass over the registry. Returns the ids this pass removed.
    pub fn sweep(&self) -> Vec<ClientId> {
        let now = Instant::now();
        let mut evicted = Vec::new();

        for client in self.registry.snapshot() {
            let reason = if self
                .max_connection_age
                .is_some_and(|cap| client.age(now) > cap)
            {
                RemovalReason::Expired
            } else if client.idle_for(now) > self.stale_timeout {
                RemovalReason::Stale
            } else {
                continue;
            };

            // A concurrent removal may win; that is fine.
            if self.registry.remove(client.id(), reason) {
                evicted.push(client.id());
            }
        }

        evicted
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_secs = self.interval.as_secs_f64(),
                stale_timeout_secs = self.stale_timeout.as_secs_f64(),
                "reaper started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.sweep();
                        debug!(
                            evicted = evicted.len(),
                            remaining = self.registry.len(),
                            "reaper sweep"
                        );
                    }
                }
            }

            info!("reaper stopped");
        })
    }
}
