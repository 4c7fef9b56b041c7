//! Client registry: the set of currently connected subscribers.
//!
//! The registry owns every [`ClientRecord`]. Connection adapters keep only the
//! [`ClientId`] and ask for removal by id.
//!
//! ## Concurrency
//!
//! - The map sits behind a `std::sync::RwLock`; the lock is never held across
//!   an `.await` and never while calling into a transport.
//! - A record is fully built before it is inserted, so [`Registry::snapshot`]
//!   can only observe complete records.
//! - Removal is idempotent: heartbeat failures, the reaper and explicit
//!   unsubscribes may race to remove the same client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stockwire_core::ClientId;

use crate::config::NotifierConfig;
use crate::frame::EventFrame;
use crate::sink::{FrameSink, SendError};
use crate::writer;

/// Why a client left the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalReason {
    /// Connection layer reported a close.
    Unsubscribed,
    /// A frame could not be handed off or written.
    SendFailed(SendError),
    /// No successful write within the stale timeout.
    Stale,
    /// Connection outlived the absolute age cap.
    Expired,
    /// Notifier teardown.
    Shutdown,
}

impl core::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RemovalReason::Unsubscribed => f.write_str("unsubscribed"),
            RemovalReason::SendFailed(e) => write!(f, "send failed: {e}"),
            RemovalReason::Stale => f.write_str("stale"),
            RemovalReason::Expired => f.write_str("max connection age reached"),
            RemovalReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// A registered subscriber.
#[derive(Debug)]
pub struct ClientRecord {
    id: ClientId,
    seq: u64,
    registered_at: DateTime<Utc>,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
    outbound: mpsc::Sender<EventFrame>,
    cancel: CancellationToken,
}

impl ClientRecord {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Time of the last successful write (registration time until then).
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.connected_at)
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Hand a frame to the client's writer without waiting.
    pub(crate) fn enqueue(&self, frame: EventFrame) -> Result<(), SendError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Concurrent-safe map of connected clients.
#[derive(Debug)]
pub struct Registry {
    clients: RwLock<HashMap<ClientId, Arc<ClientRecord>>>,
    next_seq: AtomicU64,
    queue_capacity: usize,
    send_timeout: Duration,
    stale_timeout: Duration,
    root: CancellationToken,
}

impl Registry {
    /// Create a registry. Every client token is a child of `root`, so
    /// cancelling `root` stops all writers.
    pub fn new(config: &NotifierConfig, root: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            queue_capacity: config.client_queue_capacity.max(1),
            send_timeout: config.send_timeout,
            stale_timeout: config.stale_timeout,
            root,
        })
    }

    /// Idle time after which a client no longer counts as making progress.
    pub(crate) fn stale_timeout(&self) -> Duration {
        self.stale_timeout
    }

    /// Register a client and start its writer task.
    ///
    /// Must be called within a Tokio runtime. Never fails.
    pub fn register(self: &Arc<Self>, sink: Arc<dyn FrameSink>) -> ClientId {
        self.register_with(sink, |_| None)
    }

    /// Register a client whose first frame is produced from its new id.
    ///
    /// The greeting is queued before the record becomes visible, so no
    /// broadcast can overtake it.
    pub fn register_with<G>(self: &Arc<Self>, sink: Arc<dyn FrameSink>, greeting: G) -> ClientId
    where
        G: FnOnce(ClientId) -> Option<EventFrame>,
    {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let cancel = self.root.child_token();
        let now = Instant::now();

        let mut clients = self.write_clients();

        let id = loop {
            let candidate = ClientId::new();
            if !clients.contains_key(&candidate) {
                break candidate;
            }
            warn!(client_id = %candidate, "client id collision; regenerating");
        };

        let record = Arc::new(ClientRecord {
            id,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            registered_at: Utc::now(),
            connected_at: now,
            last_activity: Mutex::new(now),
            outbound: tx,
            cancel,
        });

        if self.root.is_cancelled() {
            // Torn down: the id is handed out but the client is never live.
            warn!(client_id = %id, "registry shut down; subscriber not registered");
            return id;
        }

        if let Some(frame) = greeting(id) {
            // Fresh queue with capacity >= 1; cannot be full.
            let _ = record.enqueue(frame);
        }

        clients.insert(id, Arc::clone(&record));
        let total = clients.len();
        drop(clients);

        tokio::spawn(writer::run(
            Arc::downgrade(self),
            record,
            rx,
            sink,
            self.send_timeout,
        ));

        info!(client_id = %id, clients = total, "client registered");
        id
    }

    /// Remove a client. Unknown ids are a no-op.
    pub fn unregister(&self, id: ClientId) -> bool {
        self.remove(id, RemovalReason::Unsubscribed)
    }

    /// Remove a client for a specific reason and cancel its writer.
    ///
    /// Returns `true` only for the call that actually removed the record.
    pub fn remove(&self, id: ClientId, reason: RemovalReason) -> bool {
        let removed = {
            let mut clients = self.write_clients();
            clients.remove(&id).map(|record| (record, clients.len()))
        };

        match removed {
            Some((record, remaining)) => {
                record.cancel.cancel();
                match &reason {
                    RemovalReason::Unsubscribed | RemovalReason::Shutdown => {
                        info!(client_id = %id, reason = %reason, clients = remaining, "client removed")
                    }
                    _ => warn!(client_id = %id, reason = %reason, clients = remaining, "client evicted"),
                }
                true
            }
            None => {
                debug!(client_id = %id, reason = %reason, "client already removed");
                false
            }
        }
    }

    /// Point-in-time copy of all records, oldest registration first.
    pub fn snapshot(&self) -> Vec<Arc<ClientRecord>> {
        let mut records: Vec<Arc<ClientRecord>> = self.read_clients().values().cloned().collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    pub fn get(&self, id: ClientId) -> Option<Arc<ClientRecord>> {
        self.read_clients().get(&id).cloned()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.read_clients().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read_clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every client (teardown). Returns how many were removed.
    pub fn drain(&self) -> usize {
        let drained: Vec<Arc<ClientRecord>> = self.write_clients().drain().map(|(_, r)| r).collect();
        for record in &drained {
            record.cancel.cancel();
        }
        if !drained.is_empty() {
            info!(clients = drained.len(), reason = %RemovalReason::Shutdown, "registry drained");
        }
        drained.len()
    }

    fn read_clients(&self) -> RwLockReadGuard<'_, HashMap<ClientId, Arc<ClientRecord>>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_clients(&self) -> RwLockWriteGuard<'_, HashMap<ClientId, Arc<ClientRecord>>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;
    use crate::frame::EventType;
    use crate::sink::test_sinks::RecordingSink;

    fn registry() -> Arc<Registry> {
        Registry::new(&NotifierConfig::default(), CancellationToken::new())
    }

    #[tokio::test]
    async fn register_then_unregister() {
        let reg = registry();
        let id = reg.register(RecordingSink::new());

        assert!(reg.contains(id));
        assert_eq!(reg.len(), 1);

        assert!(reg.unregister(id));
        assert!(!reg.contains(id));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn unregister_unknown_id_is_noop() {
        let reg = registry();
        let live = reg.register(RecordingSink::new());

        assert!(!reg.unregister(ClientId::new()));
        assert_eq!(reg.len(), 1);

        assert!(reg.unregister(live));
        assert!(!reg.unregister(live));
        assert_eq!(reg.len(), 0);
    }

    #[tokio::test]
    async fn removal_cancels_client_token() {
        let reg = registry();
        let id = reg.register(RecordingSink::new());
        let record = reg.get(id).unwrap();

        reg.remove(id, RemovalReason::Stale);
        assert!(record.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn snapshot_is_in_registration_order_and_detached() {
        let reg = registry();
        let ids: Vec<ClientId> = (0..5).map(|_| reg.register(RecordingSink::new())).collect();

        let snap = reg.snapshot();
        let snap_ids: Vec<ClientId> = snap.iter().map(|r| r.id()).collect();
        assert_eq!(snap_ids, ids);

        // Later mutation does not affect an existing snapshot.
        reg.unregister(ids[0]);
        assert_eq!(snap.len(), 5);
        assert_eq!(reg.snapshot().len(), 4);
    }

    #[tokio::test]
    async fn greeting_is_first_frame() {
        let reg = registry();
        let sink = RecordingSink::new();
        let id = reg.register_with(sink.clone(), |id| Some(EventFrame::connected(id)));

        for _ in 0..50 {
            if !sink.frames().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let frames = sink.frames();
        assert_eq!(frames[0].event_type(), EventType::Connected);
        assert_eq!(frames[0].payload()["client_id"], id.to_string());
    }

    #[tokio::test]
    async fn drain_removes_everything() {
        let reg = registry();
        let records: Vec<_> = (0..3)
            .map(|_| reg.register(RecordingSink::new()))
            .map(|id| reg.get(id).unwrap())
            .collect();

        assert_eq!(reg.drain(), 3);
        assert!(reg.is_empty());
        assert!(records.iter().all(|r| r.cancel_token().is_cancelled()));
    }

    #[tokio::test]
    async fn register_after_root_cancelled_is_not_live() {
        let root = CancellationToken::new();
        let reg = Registry::new(&NotifierConfig::default(), root.clone());
        root.cancel();

        let id = reg.register(RecordingSink::new());
        assert!(!reg.contains(id));
        assert!(reg.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_are_distinct_and_complete() {
        let reg = registry();

        let handles: Vec<_> = (0..1000)
            .map(|_| {
                let reg = Arc::clone(&reg);
                tokio::spawn(async move { reg.register(RecordingSink::new()) })
            })
            .collect();

        let mut ids = HashSet::new();
        for h in handles {
            ids.insert(h.await.unwrap());
        }

        assert_eq!(ids.len(), 1000);
        assert_eq!(reg.len(), 1000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_unregister_keeps_count() {
        let reg = registry();

        let handles: Vec<_> = (0..200)
            .map(|i| {
                let reg = Arc::clone(&reg);
                tokio::spawn(async move {
                    let id = reg.register(RecordingSink::new());
                    if i % 2 == 0 {
                        assert!(reg.unregister(id));
                        // Stale second removal.
                        assert!(!reg.unregister(id));
                    }
                })
            })
            .collect();

        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(reg.len(), 100);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register,
        Unregister(usize),
        UnregisterUnknown,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Register),
            2 => any::<usize>().prop_map(Op::Unregister),
            1 => Just(Op::UnregisterUnknown),
        ]
    }

    proptest! {
        #[test]
        fn size_tracks_registers_minus_removals(ops in proptest::collection::vec(op(), 0..64)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let reg = registry();
                let mut issued: Vec<ClientId> = Vec::new();
                let mut registers = 0usize;
                let mut removals = 0usize;

                for op in ops {
                    match op {
                        Op::Register => {
                            issued.push(reg.register(RecordingSink::new()));
                            registers += 1;
                        }
                        Op::Unregister(i) if !issued.is_empty() => {
                            let id = issued[i % issued.len()];
                            if reg.unregister(id) {
                                removals += 1;
                            }
                        }
                        Op::Unregister(_) => {}
                        Op::UnregisterUnknown => {
                            prop_assert!(!reg.unregister(ClientId::new()));
                        }
                    }
                    prop_assert_eq!(reg.len(), registers - removals);
                }
                Ok(())
            })?;
        }
    }
}
