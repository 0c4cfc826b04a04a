//! Core of the glucolog client: offline-first reading storage contracts
//! and the synchronization engine.
//!
//! The engine guarantees eventual, crash-safe, at-least-once delivery of
//! locally recorded readings to the remote, with no silent local data
//! loss. It is not a CRDT system: conflicts are single-field,
//! value/time-window based, and adjudicated by the user.

pub mod errors;
pub mod memory;
pub mod readings;
pub mod sync;

pub use errors::{Error, Result};
