// Path: crates/types/src/error.rs
//! Core error types for the Shutter relay node.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors produced by the persistent store and the event handlers writing
/// to it.
///
/// All of these are unrecoverable for the event stream that triggered them:
/// the reconciler reports them and terminates instead of retrying.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error occurred in the storage backend.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A record failed to encode or decode.
    #[error("record codec error: {0}")]
    Codec(String),
    /// A `LatestBlock` event did not advance past the current latest block.
    #[error("ordering violation: new block {block} is not above latest block {latest}")]
    OrderingViolation {
        /// The offending block number.
        block: u64,
        /// The latest block already finalized.
        latest: u64,
    },
    /// A keyper set arrived for an eon index that already exists with
    /// different contents.
    #[error("eon {index} already exists with different contents")]
    DuplicateEon {
        /// The conflicting eon index.
        index: u64,
    },
    /// An event referenced an eon that was never announced.
    #[error("no eon known for index {index}")]
    UnknownEon {
        /// The missing eon index.
        index: u64,
    },
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORE_BACKEND_ERROR",
            Self::Codec(_) => "STORE_CODEC_ERROR",
            Self::OrderingViolation { .. } => "STORE_ORDERING_VIOLATION",
            Self::DuplicateEon { .. } => "STORE_DUPLICATE_EON",
            Self::UnknownEon { .. } => "STORE_UNKNOWN_EON",
        }
    }
}

/// Request-level errors scoped to a single decryption-key request.
///
/// These resolve exactly one request's promise and are never fatal to the
/// key manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeysError {
    /// No eon's activation block covers the requested block.
    #[error("no eon found for block {block}")]
    NoEonForBlock {
        /// The requested block.
        block: u64,
    },
    /// Decryption is not active for the requested block.
    #[error("shutter not active for block {block}")]
    NotActive {
        /// The requested block.
        block: u64,
    },
    /// The caller canceled the request.
    #[error("request was canceled by caller")]
    Canceled,
    /// The key manager shut down before the request could be fulfilled.
    #[error("request was aborted")]
    Aborted,
}

impl ErrorCode for KeysError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoEonForBlock { .. } => "KEYS_NO_EON_FOR_BLOCK",
            Self::NotActive { .. } => "KEYS_NOT_ACTIVE",
            Self::Canceled => "KEYS_REQUEST_CANCELED",
            Self::Aborted => "KEYS_REQUEST_ABORTED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            StoreError::OrderingViolation { block: 1, latest: 2 }.code(),
            "STORE_ORDERING_VIOLATION"
        );
        assert_eq!(KeysError::Canceled.code(), "KEYS_REQUEST_CANCELED");
    }
}
