// Path: crates/keys/src/lib.rs
//! # Key Manager
//!
//! Matches asynchronous decryption-key arrivals to outstanding requests with
//! at-most-once fulfillment per request.
//!
//! The manager is an actor: one task owns all mutable state (the eon cache,
//! the received-key map, the pending-request list) and is reachable only
//! through message channels, so no locks guard any of it. Callers get a
//! [`KeyRequestHandle`] that resolves exactly once: with the secret key, a
//! request-scoped error, or an abort when the manager shuts down. Dropping
//! an unresolved handle cancels the request; canceling twice, or after
//! fulfillment, is a no-op.

pub mod manager;
pub mod request;

pub use manager::{Manager, ManagerError, ManagerHandle};
pub use request::{CancelRequest, KeyRequestHandle, KeyRequestResult};
