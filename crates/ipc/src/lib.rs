// Path: crates/ipc/src/lib.rs
//! # Shutter Relay IPC
//!
//! The network-facing decryption-key service: protobuf/tonic definitions,
//! the server that translates caller requests into key-manager calls, and a
//! client for consuming the unary and streaming endpoints.

pub mod client;
pub mod errs;
pub mod server;

// Re-export the generated Protobuf/Tonic code.
// Nested inside `v1` to match the proto package hierarchy
// `shutter.decryption.v1`.
pub mod decryption {
    /// Generated types for `shutter.decryption.v1`.
    pub mod v1 {
        tonic::include_proto!("shutter.decryption.v1");
    }
    // Flatten the API for users
    pub use v1::*;
}

pub use client::{Client, KeyStream};
pub use server::{serve, DecryptionKeyServer};
