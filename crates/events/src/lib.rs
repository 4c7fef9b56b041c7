//! Change notifications for long-lived subscribers.
//!
//! Pieces, leaves first:
//! - [`registry`]: concurrent-safe map of connected clients
//! - `writer`: one task per client, the only caller of its sink
//! - [`broadcaster`]: non-blocking fan-out of a frame to a registry snapshot
//! - [`heartbeat`]: shared keepalive ticker (fast dead-peer detection)
//! - [`reaper`]: periodic stale-client sweep (safety net)
//! - [`notifier`]: owns all of the above; explicit start/shutdown

pub mod broadcaster;
pub mod config;
pub mod frame;
pub mod heartbeat;
pub mod notifier;
pub mod publisher;
pub mod reaper;
pub mod registry;
pub mod sink;

mod writer;

pub use broadcaster::{Broadcaster, PublishReport};
pub use config::{ConfigError, NotifierConfig};
pub use frame::{EventFrame, EventType};
pub use notifier::{ClientSummary, Notifier};
pub use publisher::ChangePublisher;
pub use registry::{ClientRecord, Registry, RemovalReason};
pub use sink::{ChannelSink, FrameSink, IoSink, SendError};
