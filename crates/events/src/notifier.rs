//! Notifier: the explicit owner of the notification subsystem.
//!
//! Construction ([`Notifier::start`]) builds the registry and broadcaster and
//! spawns the two background loops (heartbeat driver, reaper). Teardown
//! ([`Notifier::shutdown`]) cancels the root token, which stops both loops and
//! every per-client writer, then drains the registry.
//!
//! `Notifier` is a cheap handle (`Clone`); all clones share one subsystem.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use stockwire_core::{ChangeEvent, ClientId};

use crate::broadcaster::{Broadcaster, PublishReport};
use crate::config::{ConfigError, NotifierConfig};
use crate::frame::EventFrame;
use crate::heartbeat::HeartbeatDriver;
use crate::publisher::ChangePublisher;
use crate::reaper::Reaper;
use crate::registry::{ClientRecord, Registry};
use crate::sink::FrameSink;

/// Read-only view of a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSummary {
    pub client_id: ClientId,
    pub registered_at: DateTime<Utc>,
    pub idle_ms: u64,
}

impl ClientSummary {
    fn of(record: &ClientRecord, now: Instant) -> Self {
        Self {
            client_id: record.id(),
            registered_at: record.registered_at(),
            idle_ms: u64::try_from(record.idle_for(now).as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    registry: Arc<Registry>,
    broadcaster: Arc<Broadcaster>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Notifier {
    /// Validate `config` and start the subsystem. Must run inside a Tokio runtime.
    pub fn start(config: NotifierConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let registry = Registry::new(&config, shutdown.clone());
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));

        let heartbeat = HeartbeatDriver::new(Arc::clone(&broadcaster), config.heartbeat_interval)
            .spawn(shutdown.child_token());
        let reaper = Reaper::new(Arc::clone(&registry), &config).spawn(shutdown.child_token());

        info!(
            heartbeat_secs = config.heartbeat_interval.as_secs_f64(),
            reaper_secs = config.reaper_interval.as_secs_f64(),
            stale_timeout_secs = config.stale_timeout.as_secs_f64(),
            max_connection_age_secs = config.max_connection_age.map(|d| d.as_secs_f64()),
            "notifier started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                broadcaster,
                shutdown,
                tasks: Mutex::new(vec![heartbeat, reaper]),
            }),
        })
    }

    /// Register a streaming connection. Its first frame is `connected`.
    pub fn subscribe(&self, sink: Arc<dyn FrameSink>) -> ClientId {
        self.inner
            .registry
            .register_with(sink, |id| Some(EventFrame::connected(id)))
    }

    /// Remove a connection. Unknown or already-removed ids are a no-op.
    pub fn unsubscribe(&self, id: ClientId) -> bool {
        self.inner.registry.unregister(id)
    }

    /// Fan a committed mutation out to all subscribers. Never fails.
    pub fn publish(&self, event: ChangeEvent) -> PublishReport {
        self.inner.broadcaster.publish(&event)
    }

    pub fn client_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_subscribed(&self, id: ClientId) -> bool {
        self.inner.registry.contains(id)
    }

    pub fn client(&self, id: ClientId) -> Option<ClientSummary> {
        let now = Instant::now();
        self.inner
            .registry
            .get(id)
            .map(|record| ClientSummary::of(&record, now))
    }

    /// Connected clients, oldest first.
    pub fn clients(&self) -> Vec<ClientSummary> {
        let now = Instant::now();
        self.inner
            .registry
            .snapshot()
            .iter()
            .map(|record| ClientSummary::of(record, now))
            .collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop background loops and writers and drop every client. Idempotent.
    ///
    /// Concurrent callers all return only after the background loops have
    /// been joined.
    pub async fn shutdown(&self) {
        // Held across the joins so a second caller waits for the first.
        let mut tasks = self.inner.tasks.lock().await;
        if self.inner.shutdown.is_cancelled() && tasks.is_empty() {
            return;
        }
        self.inner.shutdown.cancel();
        let removed = self.inner.registry.drain();

        for task in tasks.drain(..) {
            let _ = task.await;
        }

        info!(clients_removed = removed, "notifier shut down");
    }
}

impl ChangePublisher for Notifier {
    fn publish(&self, event: ChangeEvent) -> PublishReport {
        Notifier::publish(self, event)
    }
}
