//! Heartbeat driver.
//!
//! One shared ticker for all clients (not a timer per connection). Each tick
//! queues a `heartbeat` frame for every registered client. A closed queue
//! removes the client on the spot, and so does a full queue once the client
//! has gone `stale_timeout` without a successful write. A client whose writer
//! fails the transport write is removed by the writer. Neither path waits for
//! the reaper.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcaster::{Broadcaster, PublishReport};
use crate::frame::EventFrame;

#[derive(Debug)]
pub struct HeartbeatDriver {
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
}

impl HeartbeatDriver {
    pub fn new(broadcaster: Arc<Broadcaster>, interval: Duration) -> Self {
        Self {
            broadcaster,
            interval,
        }
    }

    /// Queue one heartbeat for every registered client.
    pub fn tick(&self) -> PublishReport {
        self.broadcaster.fan_out(EventFrame::heartbeat())
    }

    /// Run the ticker until `cancel` fires. The first beat is one interval out.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs_f64(), "heartbeat driver started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.tick();
                        if report.evicted > 0 {
                            warn!(evicted = report.evicted, "heartbeat evicted clients");
                        } else {
                            debug!(
                                clients = report.delivered,
                                dropped = report.dropped,
                                "heartbeat"
                            );
                        }
                    }
                }
            }

            info!("heartbeat driver stopped");
        })
    }
}
