// Path: crates/types/src/event.rs
//! Chain events consumed by the state reconciler.
//!
//! The upstream chain-event source delivers these in emission order, one at a
//! time. The reconciler exposes one handler per variant; it never fetches
//! events itself.

use serde::{Deserialize, Serialize};

use crate::identity::IdentityPreimage;
use crate::model::KeyperAddress;

/// A new unsafe head was observed on the rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestBlock {
    /// The observed block number.
    pub number: u64,
}

/// A keyper committee was announced for an eon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyperSet {
    /// The eon index the committee serves.
    pub eon: u64,
    /// First block at which the committee is active.
    pub activation_block: u64,
    /// Committee membership. May be empty (used upstream to burn index 0).
    pub members: Vec<KeyperAddress>,
    /// Number of keypers required to release a key.
    pub threshold: u64,
    /// Block in which the announcement was emitted.
    pub at_block: u64,
}

/// The aggregate public key for an eon was broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EonPublicKey {
    /// The eon the key belongs to.
    pub eon: u64,
    /// The serialized aggregate public key.
    pub key: Vec<u8>,
    /// Block in which the broadcast was emitted.
    pub at_block: u64,
}

/// The decryption protocol was paused or unpaused.
///
/// Takes effect one block after `at_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutterState {
    /// The new activity state.
    pub active: bool,
    /// Block in which the toggle was emitted.
    pub at_block: u64,
}

/// A verified per-epoch secret key delivered by the peer network.
///
/// Validation against the eon public key happens in the transport layer;
/// by the time this reaches the core it is known to be genuine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSecretKey {
    /// The eon whose committee released the key.
    pub eon: u64,
    /// The epoch identity the key is bound to.
    pub identity: IdentityPreimage,
    /// The released secret key material.
    pub secret_key: Vec<u8>,
}

/// The union of everything the reconciler's event loop consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A new unsafe head.
    LatestBlock(LatestBlock),
    /// A committee announcement.
    KeyperSet(KeyperSet),
    /// An eon public-key broadcast.
    EonPublicKey(EonPublicKey),
    /// A pause/unpause toggle.
    ShutterState(ShutterState),
    /// A verified secret key from the peer network.
    NewSecretKey(NewSecretKey),
}
