// Path: crates/ipc/src/errs.rs
//! Status taxonomy at the service boundary.
//!
//! Exactly one of these (or success) is returned per call:
//! - `FAILED_PRECONDITION`: the system is not in an active-decryption
//!   state for the requested block;
//! - `UNAVAILABLE`: the service is shutting down;
//! - `CANCELLED`: the caller's own context ended.
//!
//! Translation from internal errors happens exactly once, here, at the
//! outermost call.

use tonic::Status;

use shutter_types::KeysError;

/// Precondition failure: no decryption key exists because decryption is not
/// active for the requested block.
pub fn inactive() -> Status {
    Status::failed_precondition("shutter inactive for requested block")
}

/// The service is shutting down.
pub fn connection_closed() -> Status {
    Status::unavailable("connection closed")
}

/// The caller canceled the request.
pub fn canceled() -> Status {
    Status::cancelled("request canceled by client")
}

/// Maps a request-scoped error to its protocol status.
pub fn status_for(err: &KeysError) -> Status {
    match err {
        KeysError::NoEonForBlock { .. } | KeysError::NotActive { .. } => inactive(),
        KeysError::Canceled => canceled(),
        KeysError::Aborted => connection_closed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn taxonomy_maps_to_distinct_codes() {
        assert_eq!(
            status_for(&KeysError::NoEonForBlock { block: 1 }).code(),
            Code::FailedPrecondition
        );
        assert_eq!(status_for(&KeysError::Canceled).code(), Code::Cancelled);
        assert_eq!(status_for(&KeysError::Aborted).code(), Code::Unavailable);
    }
}
