//! `stockwire-core` — shared primitives for the change-notification service.
//!
//! This crate holds **pure** types only (no runtime, no IO): subscriber
//! identifiers and the mutation contract collaborators publish through.

pub mod change;
pub mod error;
pub mod id;

pub use change::{ChangeEvent, Operation, RecordKey, Table};
pub use error::CoreError;
pub use id::ClientId;
