// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Shutter Relay Types
//!
//! This crate is the foundational library for the Shutter relay node,
//! containing the chain-event and record models shared by every other
//! crate in the workspace.
//!
//! ## Architectural Role
//!
//! As the base crate, `shutter-types` has minimal dependencies and is itself
//! a dependency for almost every other workspace member. This structure
//! prevents circular dependencies and provides a stable, canonical definition
//! for shared types like `Eon`, `State`, `Epoch` and the error enums.

/// A top-level, crate-wide `Result` type alias with a default error type.
pub type Result<T, E = crate::error::StoreError> = std::result::Result<T, E>;

/// Chain events consumed from the upstream event feed and the peer network.
pub mod event;
/// Epoch identity preimages and their block-number derivation.
pub mod identity;
/// Persistent record models: eons, keypers, chain state, epochs, toggles.
pub mod model;
/// A unified set of all error types used across the workspace.
pub mod error;

pub use error::{KeysError, StoreError};
pub use event::{ChainEvent, EonPublicKey, KeyperSet, LatestBlock, NewSecretKey, ShutterState};
pub use identity::IdentityPreimage;
pub use model::{ActiveToggle, Eon, Epoch, KeyperAddress, State};
