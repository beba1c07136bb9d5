// Path: crates/storage/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

//! Pure-Rust persistent storage (redb) for the Shutter relay node.
//!
//! This crate provides the [`Store`] the state reconciler writes through and
//! the query primitives the rest of the node reads with: point lookups by
//! unique key, "most recent row with key <= N" via reverse range scans over
//! big-endian keys, and transactional multi-writes (one write transaction
//! per applied chain event).

pub mod store;

pub use store::Store;
