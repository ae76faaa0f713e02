//! Shared building blocks for the beacon-rpc framework.
//!
//! This crate holds everything the three roles (registry, provider, consumer)
//! agree on: the framed wire codec, the message envelope and its typed
//! payloads, the error type, the configuration loader, and small network
//! helpers.

pub mod config;
pub mod net;
pub mod protocol;
pub mod transport;

pub use protocol::error::{Result, RpcError};
