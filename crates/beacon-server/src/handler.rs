use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use beacon_common::protocol::{service_key, RpcRequest, RpcResponse, ServiceInfo};
use beacon_common::Result;

/// A hosted service implementation.
///
/// This is the explicit stand-in for reflective method dispatch: the
/// implementation receives the method name and the positional JSON
/// parameters and answers with a JSON result. A returned error becomes a
/// FAIL response carrying the error message.
pub trait ServiceHandler: Send + Sync {
    fn invoke(&self, method: &str, params: &[Value]) -> Result<Value>;
}

impl<F> ServiceHandler for F
where
    F: Fn(&str, &[Value]) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, method: &str, params: &[Value]) -> Result<Value> {
        self(method, params)
    }
}

/// Identity of a hosted service: name plus version/group coordinates.
///
/// The explicit replacement for the provider-side annotation; version and
/// group default the same way the annotation fields did.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescriptor {
    pub service_name: String,
    pub version: String,
    pub group: String,
}

impl ServiceDescriptor {
    pub fn new(service_name: impl Into<String>) -> Self {
        ServiceDescriptor {
            service_name: service_name.into(),
            version: "1.0.0".into(),
            group: String::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn service_key(&self) -> String {
        service_key(&self.service_name, Some(&self.version), Some(&self.group))
    }

    /// The `ServiceInfo` advertised to the registry for this descriptor.
    pub fn to_service_info(&self, address: impl Into<String>) -> ServiceInfo {
        ServiceInfo::new(
            self.service_name.clone(),
            self.version.clone(),
            self.group.clone(),
            address,
        )
    }
}

/// A hand-written service stub: method names mapped to closures.
///
/// The ergonomic way to build a [`ServiceHandler`] without writing the
/// method dispatch by hand:
///
/// ```
/// use beacon_server::MethodRouter;
/// use serde_json::{json, Value};
///
/// let handler = MethodRouter::new()
///     .method("add", |params: &[Value]| {
///         let a = params[0].as_i64().unwrap_or(0);
///         let b = params[1].as_i64().unwrap_or(0);
///         Ok(json!(a + b))
///     })
///     .method("ping", |_params: &[Value]| Ok(json!("pong")));
/// ```
#[derive(Default)]
pub struct MethodRouter {
    methods: HashMap<String, Box<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>>,
}

impl MethodRouter {
    pub fn new() -> Self {
        MethodRouter::default()
    }

    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(f));
        self
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

impl ServiceHandler for MethodRouter {
    fn invoke(&self, method: &str, params: &[Value]) -> Result<Value> {
        match self.methods.get(method) {
            Some(f) => f(params),
            None => Err(beacon_common::RpcError::Protocol(format!(
                "no such method: {method}"
            ))),
        }
    }
}

/// Turns a decoded request into a response. The provider's dispatch seam:
/// the connection loop only ever sees this trait, so tests and embedders can
/// substitute their own invoker.
pub trait Invoker: Send + Sync {
    fn handle(&self, request: &RpcRequest) -> RpcResponse;
}

/// The default invoker: a map from service key to handler.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<String, Arc<dyn ServiceHandler>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        HandlerTable::default()
    }

    pub fn insert(&self, key: String, handler: Arc<dyn ServiceHandler>) {
        tracing::info!(%key, "service handler registered");
        self.handlers.write().unwrap().insert(key, handler);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers.read().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().unwrap().is_empty()
    }
}

impl Invoker for HandlerTable {
    fn handle(&self, request: &RpcRequest) -> RpcResponse {
        let key = request.service_key();
        let Some(handler) = self.get(&key) else {
            tracing::error!(key, "request for unknown service");
            return RpcResponse::fail(format!("service not found: {key}"));
        };

        tracing::debug!(key, method = %request.method_name, "dispatching request");
        match handler.invoke(&request.method_name, &request.parameters) {
            Ok(value) => RpcResponse::success(value),
            Err(e) => {
                tracing::error!(key, method = %request.method_name, "handler failed: {e}");
                RpcResponse::fail(e.to_string())
            }
        }
    }
}
