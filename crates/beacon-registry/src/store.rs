use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use beacon_common::protocol::ServiceInfo;

/// In-memory registry state: the service table and the heartbeat table.
///
/// Both tables live behind one lock so register/unregister/sweep appear
/// atomic to concurrent lookups: a lookup observes either the full pre-state
/// or the full post-state of a mutation, never a half-update.
pub struct RegistryStore {
    heartbeat_timeout: Duration,
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    /// serviceKey -> providers, insertion-ordered, unique by address.
    services: HashMap<String, Vec<ServiceInfo>>,
    /// provider address (host:port) -> last heartbeat.
    heartbeats: HashMap<String, Instant>,
}

impl RegistryStore {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        RegistryStore {
            heartbeat_timeout,
            state: RwLock::new(State::default()),
        }
    }

    /// Registers a provider endpoint.
    ///
    /// A service with an empty name gets the synthesized key
    /// `unknown_service_<address>`. Registering the same address twice under
    /// one key is a no-op for the table; the heartbeat is refreshed either
    /// way, so REGISTER doubles as an implicit heartbeat.
    pub async fn register(&self, info: ServiceInfo) -> String {
        let key = effective_key(&info);
        let address = info.address.clone();

        let mut state = self.state.write().await;
        let list = state.services.entry(key.clone()).or_default();
        if !list.iter().any(|svc| svc.address == info.address) {
            list.push(info);
            tracing::info!(%key, %address, instances = list.len(), "service registered");
        } else {
            tracing::debug!(%key, %address, "service already registered");
        }
        state.heartbeats.insert(address, Instant::now());
        key
    }

    /// Removes the provider's entry for this service; the heartbeat record
    /// survives only while some other service still uses the address.
    pub async fn unregister(&self, info: &ServiceInfo) {
        let key = effective_key(info);

        let mut state = self.state.write().await;
        if let Some(list) = state.services.get_mut(&key) {
            list.retain(|svc| svc.address != info.address);
            if list.is_empty() {
                state.services.remove(&key);
                tracing::info!(%key, "last instance unregistered, key removed");
            }
        } else {
            tracing::warn!(%key, "unregister for unknown service key");
        }

        let address_in_use = state
            .services
            .values()
            .flatten()
            .any(|svc| svc.address == info.address);
        if !address_in_use {
            state.heartbeats.remove(&info.address);
            tracing::debug!(address = %info.address, "heartbeat record removed");
        }
    }

    /// Returns a snapshot copy of the providers for the derived key, or an
    /// empty list. Missing keys never fail.
    pub async fn lookup(
        &self,
        name: &str,
        version: Option<&str>,
        group: Option<&str>,
    ) -> Vec<ServiceInfo> {
        let key = beacon_common::protocol::service_key(name, version, group);
        let state = self.state.read().await;
        state.services.get(&key).cloned().unwrap_or_default()
    }

    /// Refreshes the last-seen time for a provider address.
    pub async fn heartbeat(&self, address: &str) {
        if address.is_empty() {
            tracing::warn!("heartbeat with empty address ignored");
            return;
        }
        let mut state = self.state.write().await;
        state.heartbeats.insert(address.to_string(), Instant::now());
        tracing::debug!(address, "heartbeat refreshed");
    }

    /// Expires every address silent for longer than the heartbeat timeout,
    /// removing all of its services and its heartbeat record. Returns the
    /// expired addresses.
    pub async fn sweep(&self) -> Vec<String> {
        let now = Instant::now();
        let mut state = self.state.write().await;

        let expired: Vec<String> = state
            .heartbeats
            .iter()
            .filter(|(_, last)| now.duration_since(**last) > self.heartbeat_timeout)
            .map(|(addr, _)| addr.clone())
            .collect();

        for address in &expired {
            state.heartbeats.remove(address);
            for list in state.services.values_mut() {
                list.retain(|svc| &svc.address != address);
            }
            tracing::warn!(%address, "provider expired, services removed");
        }
        state.services.retain(|_, list| !list.is_empty());

        expired
    }

    /// Total number of registered service instances.
    pub async fn service_count(&self) -> usize {
        let state = self.state.read().await;
        state.services.values().map(Vec::len).sum()
    }

    /// Snapshot of the whole service table, for debug logging.
    pub async fn all_services(&self) -> HashMap<String, Vec<ServiceInfo>> {
        self.state.read().await.services.clone()
    }

    /// Whether an address currently has a heartbeat record.
    pub async fn has_heartbeat(&self, address: &str) -> bool {
        self.state.read().await.heartbeats.contains_key(address)
    }
}

fn effective_key(info: &ServiceInfo) -> String {
    let key = info.service_key();
    if key.is_empty() {
        tracing::warn!(address = %info.address, "empty service key, synthesizing from address");
        format!("unknown_service_{}", info.address)
    } else {
        key
    }
}
