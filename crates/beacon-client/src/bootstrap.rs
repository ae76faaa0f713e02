use std::sync::Arc;
use std::time::Duration;

use beacon_common::config::Config;
use beacon_common::Result;
use beacon_registry::RegistryClientOptions;

use crate::client::RpcClient;
use crate::condition::ConditionEvaluator;
use crate::facade::{ReferenceConfig, ServiceClient};
use crate::local::LocalServiceRegistry;

/// Owner of the consumer-side shared state.
///
/// One bootstrap per process (or per test) wires the consumer client, the
/// local-service registry, and the condition evaluator together and hands
/// out [`ServiceClient`] surfaces that share them. Tests substitute fakes
/// by building the parts themselves.
pub struct RpcBootstrap {
    client: Arc<RpcClient>,
    locals: Arc<LocalServiceRegistry>,
    conditions: Arc<ConditionEvaluator>,
}

impl RpcBootstrap {
    /// Connects to the registry named by `rpc.registry.address` and uses
    /// `rpc.client.timeout` as the default call timeout.
    pub async fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::from_parts(Arc::new(RpcClient::from_config(config).await?)))
    }

    pub async fn connect(
        registry_address: impl Into<String>,
        default_timeout: Duration,
    ) -> Result<Self> {
        let client = RpcClient::connect(registry_address, default_timeout).await?;
        Ok(Self::from_parts(Arc::new(client)))
    }

    pub async fn connect_with_options(
        registry_address: impl Into<String>,
        default_timeout: Duration,
        options: RegistryClientOptions,
    ) -> Result<Self> {
        let client =
            RpcClient::connect_with_options(registry_address, default_timeout, options).await?;
        Ok(Self::from_parts(Arc::new(client)))
    }

    pub fn from_parts(client: Arc<RpcClient>) -> Self {
        RpcBootstrap {
            client,
            locals: Arc::new(LocalServiceRegistry::new()),
            conditions: Arc::new(ConditionEvaluator::new()),
        }
    }

    pub fn client(&self) -> Arc<RpcClient> {
        self.client.clone()
    }

    pub fn locals(&self) -> Arc<LocalServiceRegistry> {
        self.locals.clone()
    }

    pub fn conditions(&self) -> Arc<ConditionEvaluator> {
        self.conditions.clone()
    }

    /// A typed surface for one service, sharing this bootstrap's client,
    /// local registry, and condition evaluator.
    pub fn service(&self, config: ReferenceConfig) -> ServiceClient {
        ServiceClient::new(
            self.client.clone(),
            self.locals.clone(),
            self.conditions.clone(),
            config,
        )
    }

    /// Closes the shared client and with it every cached connection and the
    /// registry session.
    pub async fn shutdown(&self) {
        self.client.close().await;
    }
}
