// Path: crates/types/src/model.rs
//! Persistent record models.
//!
//! These are the rows the state reconciler writes and the key manager's
//! cached view is built from. All of them encode with `serde` so the storage
//! crate can persist them without its own mirror structs.

use serde::{Deserialize, Serialize};

use crate::identity::IdentityPreimage;

/// The fixed byte width of a keyper address.
pub const ADDRESS_BYTES: usize = 20;

/// A committee-member identity (an EVM-style 20-byte address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyperAddress([u8; ADDRESS_BYTES]);

impl KeyperAddress {
    /// Wraps raw address bytes.
    pub fn new(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(bytes)
    }

    /// Interprets a raw byte slice as an address; `None` on width mismatch.
    pub fn from_slice(b: &[u8]) -> Option<Self> {
        b.try_into().ok().map(Self)
    }

    /// Returns the raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }
}

impl std::fmt::Display for KeyperAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// One keyper committee epoch.
///
/// An eon becomes the active committee at `activation_block` and stays active
/// until a later eon's activation block is reached. The aggregate
/// `public_key` is broadcast separately from the keyper set and may therefore
/// be absent for a while; until it arrives, no key for this eon can be
/// validated upstream and the eon does not count as decryption-ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eon {
    /// The unique, monotonically introduced eon index.
    pub index: u64,
    /// Whether the keyper set that announced this eon was finalized on chain.
    pub is_finalized: bool,
    /// First block at which this eon is the active committee.
    pub activation_block: u64,
    /// Number of keypers required to release a decryption key.
    pub threshold: u64,
    /// Aggregate eon public key, once broadcast.
    pub public_key: Option<Vec<u8>>,
    /// Committee membership. May overlap with other eons.
    pub keypers: Vec<KeyperAddress>,
}

impl Eon {
    /// Whether `addr` is a member of this eon's committee.
    pub fn has_keyper(&self, addr: &KeyperAddress) -> bool {
        self.keypers.contains(addr)
    }
}

/// A paused/unpaused flip of the decryption protocol.
///
/// The event is emitted in `insert_block`, but the state it represents only
/// takes effect at `effective_block`, one block later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveToggle {
    /// Block in which the toggle event was emitted.
    pub insert_block: u64,
    /// First block at which the toggle applies (`insert_block + 1`).
    pub effective_block: u64,
    /// The new activity state.
    pub active: bool,
}

impl ActiveToggle {
    /// Builds a toggle emitted at `insert_block`, effective one block later.
    pub fn new(insert_block: u64, active: bool) -> Self {
        Self {
            insert_block,
            effective_block: insert_block + 1,
            active,
        }
    }
}

/// The reconciled chain state at one observed block.
///
/// A row is first inserted with `is_pending = true`, then finalized once all
/// of the block's events have been applied. Exactly one row carries
/// `is_latest = true` at any time; that row is the node's current belief
/// about the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// The observed block number (unique).
    pub block: u64,
    /// Whether this row is the current canonical view.
    pub is_latest: bool,
    /// Whether the row still awaits finalization.
    pub is_pending: bool,
    /// Index of the eon active at this block, if any is known.
    pub eon_index: Option<u64>,
    /// Whether decryption was active at this block; `None` while pending.
    pub shutter_active: Option<bool>,
}

impl State {
    /// A freshly observed, not yet finalized row for `block`.
    pub fn pending(block: u64) -> Self {
        Self {
            block,
            is_latest: false,
            is_pending: true,
            eon_index: None,
            shutter_active: None,
        }
    }
}

/// A per-block decryption key record.
///
/// Created when a verified key arrives from the peer network; `secret_key`
/// is `None` if only a placeholder (expected-but-not-yet-arrived) entry
/// exists. Unique per `(eon_index, block)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    /// The eon whose committee released (or will release) this key.
    pub eon_index: u64,
    /// The epoch identity the key is bound to.
    pub identity: IdentityPreimage,
    /// The released secret key material, once received.
    pub secret_key: Option<Vec<u8>>,
    /// The block this key decrypts.
    pub block: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_takes_effect_one_block_late() {
        let t = ActiveToggle::new(5, true);
        assert_eq!(t.effective_block, 6);
        assert!(t.active);
    }

    #[test]
    fn keyper_membership_lookup() {
        let a = KeyperAddress::new([1u8; ADDRESS_BYTES]);
        let b = KeyperAddress::new([2u8; ADDRESS_BYTES]);
        let eon = Eon {
            index: 0,
            is_finalized: true,
            activation_block: 0,
            threshold: 1,
            public_key: None,
            keypers: vec![a],
        };
        assert!(eon.has_keyper(&a));
        assert!(!eon.has_keyper(&b));
    }

    #[test]
    fn address_from_slice_enforces_width() {
        assert!(KeyperAddress::from_slice(&[0u8; ADDRESS_BYTES]).is_some());
        assert!(KeyperAddress::from_slice(&[0u8; 19]).is_none());
    }
}
