// Path: crates/sync/src/lib.rs
//! # State Reconciler
//!
//! Consumes the ordered chain-event feed, applies each event to the store in
//! its own transaction, and maintains the "latest finalized" state pointer.
//! Relevant facts (new states, new eons, activation toggles, verified secret
//! keys) are forwarded to the key manager's event loop as they are applied.
//!
//! The reconciler is a single-consumer control loop: one task owns the store
//! writes, so chain events are applied strictly in arrival order and never
//! interleave. Any persistence error or ordering violation is unrecoverable
//! for the event stream and terminates the run loop; retry, if any, belongs
//! to the upstream event-delivery collaborator.

pub mod service;

pub use service::{FactSenders, SubmitError, SyncHandle, SyncService};
