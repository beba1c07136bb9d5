// Path: crates/types/src/identity.rs
//! Epoch identity preimages.
//!
//! A decryption key released by the keypers is bound to an epoch identity.
//! For per-block decryption the identity preimage is derived from the block
//! number alone, so both sides of the protocol arrive at the same identity
//! without coordination. The cryptographic mapping from preimage to curve
//! point happens in the key-validation layer outside this crate; the core
//! only ever matches on the preimage itself.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed byte width of an epoch identity preimage.
pub const PREIMAGE_BYTES: usize = 32;

/// Errors produced when converting raw bytes into an [`IdentityPreimage`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The input slice does not have the expected width.
    #[error("byte-slice length is {got}, expected {PREIMAGE_BYTES}")]
    ByteSizeMismatch {
        /// Length of the rejected input.
        got: usize,
    },
}

/// An opaque 32-byte epoch identity preimage.
///
/// Per-block identities are the big-endian block number, zero-padded to the
/// full width (see [`IdentityPreimage::for_block`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityPreimage([u8; PREIMAGE_BYTES]);

impl IdentityPreimage {
    /// Derives the identity preimage for a block number.
    pub fn for_block(block: u64) -> Self {
        let mut buf = [0u8; PREIMAGE_BYTES];
        buf[PREIMAGE_BYTES - 8..].copy_from_slice(&block.to_be_bytes());
        Self(buf)
    }

    /// Interprets a raw byte slice as a preimage.
    pub fn from_bytes(b: &[u8]) -> Result<Self, IdentityError> {
        let buf: [u8; PREIMAGE_BYTES] = b
            .try_into()
            .map_err(|_| IdentityError::ByteSizeMismatch { got: b.len() })?;
        Ok(Self(buf))
    }

    /// Returns the raw preimage bytes.
    pub fn as_bytes(&self) -> &[u8; PREIMAGE_BYTES] {
        &self.0
    }

    /// Recovers the block number a per-block identity was derived from.
    pub fn block(&self) -> u64 {
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&self.0[PREIMAGE_BYTES - 8..]);
        u64::from_be_bytes(tail)
    }
}

impl std::fmt::Display for IdentityPreimage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}
