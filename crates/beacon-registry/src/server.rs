use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use beacon_common::protocol::{Message, ServiceInfo};
use beacon_common::transport::{decode, read_frame, write_message};
use beacon_common::{Result, RpcError};

use crate::handler;
use crate::store::RegistryStore;

/// Registry server settings.
///
/// The timing fields carry the production defaults (10 s sweep, 120 s
/// expiry, 30 s reader idle); tests compress them to milliseconds.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub port: u16,
    /// Verbose table logging after every mutation.
    pub debug: bool,
    /// Pre-register two demo services at startup.
    pub register_test_services: bool,
    pub sweep_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reader_idle: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            port: 8000,
            debug: false,
            register_test_services: false,
            sweep_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(120),
            reader_idle: Duration::from_secs(30),
        }
    }
}

/// The registry server: accept loop, per-session handling, expiry sweeper.
pub struct RegistryServer {
    listener: TcpListener,
    store: Arc<RegistryStore>,
    config: RegistryConfig,
    // Held so the sweeper dies with the server.
    sweeper_handle: JoinHandle<()>,
    // Live session tasks; aborted on shutdown so clients observe the
    // registry going away.
    sessions: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl RegistryServer {
    /// Binds the listen socket and starts the sweeper.
    pub async fn bind(config: RegistryConfig) -> Result<Self> {
        let addr = format!("0.0.0.0:{}", config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RpcError::Transport(format!("failed to bind {addr}: {e}")))?;

        let store = Arc::new(RegistryStore::new(config.heartbeat_timeout));

        if config.register_test_services {
            register_test_services(&store).await;
        }

        let sweeper_handle = spawn_sweeper(store.clone(), config.sweep_interval, config.debug);

        tracing::info!(
            port = config.port,
            debug = config.debug,
            "registry listening"
        );

        Ok(RegistryServer {
            listener,
            store,
            config,
            sweeper_handle,
            sessions: Arc::new(std::sync::Mutex::new(Vec::new())),
        })
    }

    /// The actually bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| RpcError::Transport(format!("local addr: {e}")))
    }

    /// Shared handle to the registry state.
    pub fn store(&self) -> Arc<RegistryStore> {
        self.store.clone()
    }

    /// Serves sessions until the task is dropped or aborted.
    pub async fn serve(self) -> Result<()> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| RpcError::Transport(format!("accept failed: {e}")))?;
            tracing::info!(%peer, "session opened");

            let store = self.store.clone();
            let debug = self.config.debug;
            let reader_idle = self.config.reader_idle;
            let session = tokio::spawn(async move {
                let peer = peer.to_string();
                if let Err(e) = handle_session(store, debug, reader_idle, stream, &peer).await {
                    tracing::warn!(%peer, "session error: {e}");
                }
                tracing::info!(%peer, "session closed");
            });

            let mut sessions = self.sessions.lock().unwrap();
            sessions.retain(|task| !task.is_finished());
            sessions.push(session);
        }
    }

    /// Binds and serves on a background task; returns the running server.
    /// Used by the CLI-less embedding path and by tests.
    pub async fn spawn(config: RegistryConfig) -> Result<RunningRegistry> {
        let server = Self::bind(config).await?;
        let addr = server.local_addr()?;
        let store = server.store();
        let sessions = server.sessions.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                tracing::error!("registry serve loop ended: {e}");
            }
        });
        Ok(RunningRegistry {
            addr,
            store,
            handle,
            sessions,
        })
    }
}

impl Drop for RegistryServer {
    fn drop(&mut self) {
        self.sweeper_handle.abort();
    }
}

/// A registry serving in the background.
pub struct RunningRegistry {
    pub addr: std::net::SocketAddr,
    pub store: Arc<RegistryStore>,
    handle: JoinHandle<()>,
    sessions: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl RunningRegistry {
    /// Stops accepting and tears down every live session, as a process
    /// restart would.
    pub fn shutdown(&self) {
        self.handle.abort();
        for task in self.sessions.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Drop for RunningRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle_session(
    store: Arc<RegistryStore>,
    debug: bool,
    reader_idle: Duration,
    stream: TcpStream,
    peer: &str,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let payload = match tokio::time::timeout(reader_idle, read_frame(&mut reader)).await {
            Err(_) => {
                tracing::warn!(peer, "no traffic within idle window, closing session");
                return Ok(());
            }
            Ok(Ok(None)) => return Ok(()),
            Ok(Ok(Some(payload))) => payload,
            Ok(Err(e)) => return Err(e),
        };

        // A frame that arrived whole but fails to parse gets a FAIL answer;
        // the stream is still aligned on the next frame.
        let msg = match decode(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(peer, "decode failure: {e}");
                let resp = Message::registry_fail(0, format!("decode failure: {e}"));
                write_message(&mut writer, &resp).await?;
                continue;
            }
        };

        let resp = handler::handle_message(&store, peer, msg).await;
        write_message(&mut writer, &resp).await?;

        if debug {
            let table = store.all_services().await;
            tracing::debug!(peer, table = ?table, "table after request");
        }
    }
}

fn spawn_sweeper(store: Arc<RegistryStore>, interval: Duration, debug: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh registry does
        // not sweep before anyone had a chance to register.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let expired = store.sweep().await;
            if !expired.is_empty() {
                let remaining = store.service_count().await;
                tracing::info!(
                    expired = expired.len(),
                    remaining,
                    "sweep removed expired providers"
                );
            } else if debug {
                let services = store.service_count().await;
                tracing::debug!(services, "sweep found all alive");
            }
        }
    })
}

async fn register_test_services(store: &RegistryStore) {
    tracing::info!("registering demo services");
    store
        .register(ServiceInfo::new(
            "com.rpc.demo.api.HelloService",
            "1.0.0",
            "",
            "127.0.0.1:9000",
        ))
        .await;
    store
        .register(ServiceInfo::new(
            "com.rpc.demo.api.HelloService",
            "2.0.0",
            "test",
            "127.0.0.1:9001",
        ))
        .await;
}
