//! Registry entry point.
//!
//! ```bash
//! # Listen on the default port 8000
//! beacon-registry
//!
//! # Custom port with verbose logging and the demo services registered
//! beacon-registry 8500 debugtest
//! ```
//!
//! Exits 0 on clean shutdown and non-zero when the port cannot be bound.

use anyhow::Result;
use argh::FromArgs;

use beacon_registry::{RegistryConfig, RegistryServer};

/// beacon-rpc service registry
#[derive(FromArgs)]
struct Args {
    /// port to listen on (default 8000)
    #[argh(positional, default = "8000")]
    port: u16,

    /// optional mode: "debug" for verbose logs, "test" to pre-register the
    /// demo services, "debugtest" for both
    #[argh(positional)]
    mode: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Args = argh::from_env();

    let (is_debug, register_test_services) = match args.mode.as_deref() {
        None => (false, false),
        Some("debug") => (true, false),
        Some("test") => (false, true),
        Some("debugtest") | Some("testdebug") => (true, true),
        Some(other) => {
            eprintln!("unknown mode '{other}', expected debug|test|debugtest");
            (false, false)
        }
    };

    let default_filter = if is_debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(port = args.port, debug = is_debug, register_test_services, "starting registry");

    let config = RegistryConfig {
        port: args.port,
        debug: is_debug,
        register_test_services,
        ..RegistryConfig::default()
    };

    let server = RegistryServer::bind(config)
        .await
        .map_err(|e| anyhow::anyhow!("registry startup failed: {e}"))?;

    server
        .serve()
        .await
        .map_err(|e| anyhow::anyhow!("registry stopped: {e}"))
}
