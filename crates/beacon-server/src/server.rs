use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use beacon_common::config::Config;
use beacon_common::net;
use beacon_common::protocol::{Message, MessageType, RpcResponse, ServiceInfo, FAIL_CODE};
use beacon_common::transport::{decode, read_frame, write_message};
use beacon_common::{Result, RpcError};
use beacon_registry::{RegistryClient, RegistryClientOptions};

use crate::handler::{HandlerTable, Invoker, ServiceDescriptor, ServiceHandler};

const READER_IDLE: Duration = Duration::from_secs(30);

/// A provider under construction: services are registered, then
/// [`ProviderServer::start`] binds, advertises, and serves.
pub struct ProviderServer {
    ip: String,
    port: u16,
    registry_address: String,
    registry_options: RegistryClientOptions,
    reader_idle: Duration,
    handlers: Arc<HandlerTable>,
    descriptors: Vec<ServiceDescriptor>,
    invoker: Option<Arc<dyn Invoker>>,
}

impl ProviderServer {
    pub fn new(registry_address: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        ProviderServer {
            ip: ip.into(),
            port,
            registry_address: registry_address.into(),
            registry_options: RegistryClientOptions::default(),
            reader_idle: READER_IDLE,
            handlers: Arc::new(HandlerTable::new()),
            descriptors: Vec::new(),
            invoker: None,
        }
    }

    /// Builds a provider from configuration: the registry address is
    /// required, bind IP defaults to the detected LAN address, port to 9000.
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry_address = config.registry_address()?;
        Ok(Self::new(
            registry_address,
            config.server_ip(),
            config.server_port(),
        ))
    }

    /// Overrides registry-session timing; tests compress it.
    pub fn registry_options(mut self, options: RegistryClientOptions) -> Self {
        self.registry_options = options;
        self
    }

    pub fn reader_idle(mut self, idle: Duration) -> Self {
        self.reader_idle = idle;
        self
    }

    /// Substitutes the dispatch seam; without this the built-in handler
    /// table serves requests.
    pub fn invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Hosts an implementation under the descriptor's service key.
    pub fn register_service(
        &mut self,
        descriptor: ServiceDescriptor,
        handler: Arc<dyn ServiceHandler>,
    ) {
        self.handlers.insert(descriptor.service_key(), handler);
        self.descriptors.push(descriptor);
    }

    /// Binds the listen socket, connects to the registry with heartbeat
    /// enabled, advertises every registered service, and starts serving.
    pub async fn start(self) -> Result<RunningProvider> {
        let bind = format!("{}:{}", self.ip, self.port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| RpcError::Transport(format!("failed to bind {bind}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| RpcError::Transport(format!("local addr: {e}")))?;

        let advertised_ip = if self.ip == "0.0.0.0" {
            net::local_ip()
        } else {
            self.ip.clone()
        };
        let advertised = net::build_address(&advertised_ip, local.port());

        let registry = RegistryClient::connect_with_options(
            self.registry_address.clone(),
            true,
            self.registry_options.clone(),
        )
        .await?;

        let mut services = Vec::with_capacity(self.descriptors.len());
        for descriptor in &self.descriptors {
            let info = descriptor.to_service_info(advertised.clone());
            registry.register(info.clone()).await?;
            services.push(info);
        }

        let invoker: Arc<dyn Invoker> = match self.invoker {
            Some(invoker) => invoker,
            None => self.handlers.clone(),
        };

        let reader_idle = self.reader_idle;
        let accept_invoker = invoker.clone();
        let accept_handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::info!(%peer, "consumer connected");
                        let invoker = accept_invoker.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(invoker, reader_idle, stream).await
                            {
                                tracing::warn!(%peer, "connection error: {e}");
                            }
                            tracing::info!(%peer, "consumer disconnected");
                        });
                    }
                    Err(e) => {
                        tracing::error!("accept failed: {e}");
                        break;
                    }
                }
            }
        });

        tracing::info!(address = %advertised, services = services.len(), "provider serving");

        Ok(RunningProvider {
            addr: local,
            advertised_address: advertised,
            services,
            registry,
            accept_handle,
        })
    }
}

/// A provider that is bound, advertised, and serving.
pub struct RunningProvider {
    pub addr: std::net::SocketAddr,
    pub advertised_address: String,
    services: Vec<ServiceInfo>,
    registry: RegistryClient,
    accept_handle: JoinHandle<()>,
}

impl RunningProvider {
    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn services(&self) -> &[ServiceInfo] {
        &self.services
    }

    /// Unregisters every advertised service and closes the registry
    /// session, then stops accepting. Idempotent via the registry client.
    pub async fn shutdown(&self) {
        tracing::info!(address = %self.advertised_address, "provider shutting down");
        for info in &self.services {
            if let Err(e) = self.registry.unregister(info).await {
                tracing::warn!(service = %info.service_name, "unregister failed: {e}");
            }
        }
        self.registry.destroy().await;
        self.accept_handle.abort();
    }
}

impl Drop for RunningProvider {
    fn drop(&mut self) {
        self.accept_handle.abort();
    }
}

async fn handle_connection(
    invoker: Arc<dyn Invoker>,
    reader_idle: Duration,
    stream: TcpStream,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let payload = match tokio::time::timeout(reader_idle, read_frame(&mut reader)).await {
            Err(_) => {
                tracing::warn!("no traffic within idle window, closing connection");
                return Ok(());
            }
            Ok(Ok(None)) => return Ok(()),
            Ok(Ok(Some(payload))) => payload,
            Ok(Err(e)) => return Err(e),
        };

        let msg = match decode(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!("decode failure: {e}");
                let resp = Message::response(0, &RpcResponse::fail(format!("decode failure: {e}")))?;
                write_message(&mut writer, &resp).await?;
                continue;
            }
        };

        match msg.kind() {
            Some(MessageType::HeartbeatRequest) => {
                write_message(&mut writer, &Message::heartbeat_response(msg.request_id)).await?;
            }
            Some(MessageType::Request) => {
                let request_id = msg.request_id;
                let mut response = match msg.as_request() {
                    Ok(request) => invoker.handle(&request),
                    Err(e) => {
                        tracing::error!("request payload mismatch: {e}");
                        RpcResponse::fail(format!("bad request payload: {e}"))
                    }
                };
                if response.code.is_none() {
                    tracing::warn!(request_id, "response carries no code, coercing to 500");
                    response.code = Some(FAIL_CODE);
                }
                write_message(&mut writer, &Message::response(request_id, &response)?).await?;
            }
            other => {
                // Unknown or out-of-place message types are logged and
                // discarded; the connection stays up.
                tracing::warn!(
                    message_type = msg.message_type,
                    kind = ?other,
                    "unhandled message type, discarding"
                );
            }
        }
    }
}
