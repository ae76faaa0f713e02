use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use beacon_common::protocol::service_key;
use beacon_common::Result;

/// A consumer-side service implementation, invoked instead of (or as a
/// fallback for) the remote provider.
pub trait LocalService: Send + Sync {
    fn invoke(&self, method: &str, params: &[Value]) -> Result<Value>;
}

impl<F> LocalService for F
where
    F: Fn(&str, &[Value]) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, method: &str, params: &[Value]) -> Result<Value> {
        self(method, params)
    }
}

/// Registries of local implementations (keyed by service key) and fallback
/// implementations (keyed by service name).
#[derive(Default)]
pub struct LocalServiceRegistry {
    locals: RwLock<HashMap<String, Arc<dyn LocalService>>>,
    fallbacks: RwLock<HashMap<String, Arc<dyn LocalService>>>,
}

impl LocalServiceRegistry {
    pub fn new() -> Self {
        LocalServiceRegistry::default()
    }

    pub fn register_local(
        &self,
        service_name: &str,
        version: &str,
        group: &str,
        implementation: Arc<dyn LocalService>,
    ) {
        let key = service_key(service_name, Some(version), Some(group));
        tracing::info!(%key, "local service registered");
        self.locals.write().unwrap().insert(key, implementation);
    }

    /// Registers under the default coordinates (version "1.0.0", no group).
    pub fn register_local_default(
        &self,
        service_name: &str,
        implementation: Arc<dyn LocalService>,
    ) {
        self.register_local(service_name, "1.0.0", "", implementation);
    }

    pub fn register_fallback(&self, service_name: &str, implementation: Arc<dyn LocalService>) {
        tracing::info!(service_name, "fallback service registered");
        self.fallbacks
            .write()
            .unwrap()
            .insert(service_name.to_string(), implementation);
    }

    pub fn remove_local(&self, service_name: &str, version: &str, group: &str) {
        let key = service_key(service_name, Some(version), Some(group));
        if self.locals.write().unwrap().remove(&key).is_some() {
            tracing::info!(%key, "local service removed");
        }
    }

    pub fn remove_fallback(&self, service_name: &str) {
        if self.fallbacks.write().unwrap().remove(service_name).is_some() {
            tracing::info!(service_name, "fallback service removed");
        }
    }

    /// The local implementation for the key, if any.
    pub fn get(&self, key: &str) -> Option<Arc<dyn LocalService>> {
        self.locals.read().unwrap().get(key).cloned()
    }

    /// Local implementation, else the registered fallback, else a synthetic
    /// default that answers JSON null (the facade's typed conversion turns
    /// that into the type-appropriate zero value).
    pub fn get_with_fallback(&self, key: &str, service_name: &str) -> Arc<dyn LocalService> {
        if let Some(local) = self.get(key) {
            return local;
        }
        if let Some(fallback) = self.fallbacks.read().unwrap().get(service_name) {
            tracing::info!(service_name, "using registered fallback service");
            return fallback.clone();
        }
        tracing::warn!(service_name, "no local or fallback service, using zero default");
        Arc::new(ZeroService {
            service_name: service_name.to_string(),
        })
    }

    pub fn local_count(&self) -> usize {
        self.locals.read().unwrap().len()
    }

    pub fn fallback_count(&self) -> usize {
        self.fallbacks.read().unwrap().len()
    }

    pub fn clear(&self) {
        let locals = {
            let mut map = self.locals.write().unwrap();
            std::mem::take(&mut *map).len()
        };
        let fallbacks = {
            let mut map = self.fallbacks.write().unwrap();
            std::mem::take(&mut *map).len()
        };
        tracing::info!(locals, fallbacks, "cleared local and fallback services");
    }
}

/// Synthetic default fallback: every invocation answers null.
struct ZeroService {
    service_name: String,
}

impl LocalService for ZeroService {
    fn invoke(&self, method: &str, _params: &[Value]) -> Result<Value> {
        tracing::warn!(
            service = %self.service_name,
            method,
            "zero-default fallback invoked"
        );
        Ok(Value::Null)
    }
}
