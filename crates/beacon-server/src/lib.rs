//! Provider side of beacon-rpc.
//!
//! A provider hosts service implementations behind a handler table, serves
//! consumer connections over the framed codec, and keeps itself discoverable
//! by registering with the registry and heartbeating for its lifetime.

pub mod handler;
pub mod server;

pub use handler::{HandlerTable, Invoker, MethodRouter, ServiceDescriptor, ServiceHandler};
pub use server::{ProviderServer, RunningProvider};
