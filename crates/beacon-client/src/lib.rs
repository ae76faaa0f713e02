//! Consumer side of beacon-rpc.
//!
//! The consumer resolves providers through the registry, multiplexes
//! requests over cached per-address connections, and exposes a typed
//! invocation facade that can route calls to local implementations by
//! condition and degrade to friendly values when the network cannot answer.

pub mod bootstrap;
pub mod client;
pub mod condition;
pub mod connection;
pub mod facade;
pub mod local;

pub use bootstrap::RpcBootstrap;
pub use client::RpcClient;
pub use condition::ConditionEvaluator;
pub use connection::{Connection, PendingCall};
pub use facade::{FriendlyValue, ReferenceConfig, ServiceClient};
pub use local::{LocalService, LocalServiceRegistry};
