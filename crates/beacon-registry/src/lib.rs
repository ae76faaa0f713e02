//! Service registry for beacon-rpc.
//!
//! The registry keeps an in-memory table of live providers per service key
//! and a heartbeat table of last-seen times per provider address. Providers
//! register through [`RegistryClient`] and keep their entries alive with
//! periodic heartbeats; a background sweeper expires addresses that fall
//! silent. State is intentionally volatile: a restarted registry repopulates
//! from provider re-registration.

pub mod client;
pub mod handler;
pub mod server;
pub mod store;

pub use client::{RegistryClient, RegistryClientOptions, SessionState, CALL_TIMEOUT};
pub use server::{RegistryConfig, RegistryServer, RunningRegistry};
pub use store::RegistryStore;
