// Path: crates/node/src/lib.rs
//! # Shutter Relay Node
//!
//! Wires the coordination core together: the persistent store, the state
//! reconciler, the key manager and the gRPC decryption-key service, with a
//! single shutdown signal that aborts every pending request and drains
//! in-flight RPC calls.
//!
//! The upstream chain-event source and the verified-key feed are external
//! collaborators; they attach through [`Node::sync_handle`].

pub mod config;
pub mod node;

pub use config::Config;
pub use node::Node;
