use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use rand::Rng;

use beacon_common::config::Config;
use beacon_common::protocol::{RpcRequest, RpcResponse};
use beacon_common::{Result, RpcError};
use beacon_registry::{RegistryClient, RegistryClientOptions};

use crate::connection::{Connection, PendingCall};

const CONNECT_DEADLINE: Duration = Duration::from_secs(5);
const DIAL_ATTEMPTS: u32 = 2;

/// The consumer client: provider discovery, a per-address connection cache,
/// and uniform-random balancing over the discovered providers.
pub struct RpcClient {
    registry: RegistryClient,
    connections: StdMutex<HashMap<String, Arc<Connection>>>,
    default_timeout: Duration,
    connect_deadline: Duration,
    closed: AtomicBool,
}

impl RpcClient {
    /// Builds a client from configuration. The registry session is created
    /// without a heartbeat; consumer calls reconnect it on demand.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let registry_address = config.registry_address()?;
        let registry = RegistryClient::connect(registry_address, false).await?;
        Ok(Self::with_registry(
            registry,
            Duration::from_millis(config.client_timeout_ms()),
        ))
    }

    pub async fn connect(
        registry_address: impl Into<String>,
        default_timeout: Duration,
    ) -> Result<Self> {
        let registry = RegistryClient::connect(registry_address, false).await?;
        Ok(Self::with_registry(registry, default_timeout))
    }

    pub async fn connect_with_options(
        registry_address: impl Into<String>,
        default_timeout: Duration,
        options: RegistryClientOptions,
    ) -> Result<Self> {
        let registry = RegistryClient::connect_with_options(registry_address, false, options).await?;
        Ok(Self::with_registry(registry, default_timeout))
    }

    pub fn with_registry(registry: RegistryClient, default_timeout: Duration) -> Self {
        RpcClient {
            registry,
            connections: StdMutex::new(HashMap::new()),
            default_timeout,
            connect_deadline: CONNECT_DEADLINE,
            closed: AtomicBool::new(false),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    /// Resolves a provider for the request, picks one uniformly at random,
    /// and sends over a cached (or fresh) connection. The returned handle
    /// must be awaited with a deadline.
    pub async fn send_request(&self, request: &RpcRequest) -> Result<PendingCall> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Transport("client is closed".into()));
        }

        let providers = self
            .registry
            .lookup(
                &request.service_name,
                request.version.as_deref(),
                request.group.as_deref(),
            )
            .await;
        if providers.is_empty() {
            return Err(RpcError::ServiceNotFound(request.service_key()));
        }

        // Weights are carried in the model but the core balancer is uniform.
        let picked = &providers[rand::thread_rng().gen_range(0..providers.len())];
        tracing::debug!(
            address = %picked.address,
            of = providers.len(),
            key = %request.service_key(),
            "provider selected"
        );

        let connection = self.connection_for(&picked.address).await?;
        connection.send(request).await
    }

    /// Sends and awaits with the client's default timeout.
    pub async fn call(&self, request: &RpcRequest) -> Result<RpcResponse> {
        self.call_with_timeout(request, self.default_timeout).await
    }

    pub async fn call_with_timeout(
        &self,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<RpcResponse> {
        self.send_request(request).await?.wait(timeout).await
    }

    /// Cached connection for the address, replacing any inactive one. The
    /// dial runs outside the cache lock, so two callers can race; the loser
    /// closes its fresh connection and uses the winner's.
    async fn connection_for(&self, address: &str) -> Result<Arc<Connection>> {
        {
            let mut cache = self.connections.lock().unwrap();
            if let Some(existing) = cache.get(address) {
                if existing.is_active() {
                    return Ok(existing.clone());
                }
                tracing::warn!(address, "cached connection inactive, evicting");
                existing.close();
                cache.remove(address);
            }
        }

        let fresh = self.dial(address).await?;

        let mut cache = self.connections.lock().unwrap();
        match cache.get(address) {
            Some(winner) if winner.is_active() => {
                fresh.close();
                Ok(winner.clone())
            }
            _ => {
                cache.insert(address.to_string(), fresh.clone());
                Ok(fresh)
            }
        }
    }

    /// One retry on top of the first attempt, each under the 5 s deadline.
    async fn dial(&self, address: &str) -> Result<Arc<Connection>> {
        let mut last_error = None;
        for attempt in 1..=DIAL_ATTEMPTS {
            match Connection::dial(address, self.connect_deadline).await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    tracing::warn!(address, attempt, "dial failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| RpcError::Transport(format!("dial {address} failed"))))
    }

    /// Closes every cached connection and the registry session. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("closing rpc client");
        let drained: Vec<_> = {
            let mut cache = self.connections.lock().unwrap();
            cache.drain().collect()
        };
        for (_, connection) in drained {
            connection.close();
        }
        self.registry.destroy().await;
    }
}
