use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use beacon_common::protocol::{service_key, RpcRequest};
use beacon_common::{Result, RpcError};

use crate::client::RpcClient;
use crate::condition::ConditionEvaluator;
use crate::local::LocalServiceRegistry;

const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Per-surface call configuration with the framework defaults.
#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub service_name: String,
    pub version: String,
    pub group: String,
    pub timeout: Duration,
    pub retries: u32,
    pub enable_local_service: bool,
    pub condition: String,
}

impl ReferenceConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        ReferenceConfig {
            service_name: service_name.into(),
            version: "1.0.0".into(),
            group: String::new(),
            timeout: Duration::from_millis(20_000),
            retries: 2,
            enable_local_service: false,
            condition: String::new(),
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

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn enable_local_service(mut self, enabled: bool) -> Self {
        self.enable_local_service = enabled;
        self
    }

    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn service_key(&self) -> String {
        service_key(&self.service_name, Some(&self.version), Some(&self.group))
    }
}

/// Type-appropriate stand-in values for calls that cannot raise.
///
/// When a call fails for any routine network or service reason, the typed
/// surface answers the friendly value for the return type instead of
/// propagating an error: zero for numbers, false for booleans,
/// `"error: <message>"` for strings, empty containers, `None` for options,
/// null for raw JSON.
pub trait FriendlyValue: Sized {
    fn friendly(message: &str) -> Self;
}

impl FriendlyValue for () {
    fn friendly(_message: &str) {}
}

impl FriendlyValue for bool {
    fn friendly(_message: &str) -> Self {
        false
    }
}

macro_rules! friendly_zero {
    ($($ty:ty),*) => {
        $(impl FriendlyValue for $ty {
            fn friendly(_message: &str) -> Self {
                0 as $ty
            }
        })*
    };
}
friendly_zero!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl FriendlyValue for String {
    fn friendly(message: &str) -> Self {
        format!("error: {message}")
    }
}

impl<T> FriendlyValue for Vec<T> {
    fn friendly(_message: &str) -> Self {
        Vec::new()
    }
}

impl<V> FriendlyValue for HashMap<String, V> {
    fn friendly(_message: &str) -> Self {
        HashMap::new()
    }
}

impl<V> FriendlyValue for BTreeMap<String, V> {
    fn friendly(_message: &str) -> Self {
        BTreeMap::new()
    }
}

impl<T> FriendlyValue for Option<T> {
    fn friendly(_message: &str) -> Self {
        None
    }
}

impl FriendlyValue for Value {
    fn friendly(_message: &str) -> Self {
        Value::Null
    }
}

/// The typed remote-method surface for one service.
///
/// Orchestrates the full call path: condition-gated local invocation,
/// provider lookup, bounded retries with back-off, the await deadline, and
/// fallback resolution. [`ServiceClient::call`] never fails; it answers the
/// friendly value of the requested type. [`ServiceClient::call_future`] is
/// the async surface that propagates errors instead.
pub struct ServiceClient {
    config: ReferenceConfig,
    client: Arc<RpcClient>,
    locals: Arc<LocalServiceRegistry>,
    conditions: Arc<ConditionEvaluator>,
}

impl ServiceClient {
    pub fn new(
        client: Arc<RpcClient>,
        locals: Arc<LocalServiceRegistry>,
        conditions: Arc<ConditionEvaluator>,
        config: ReferenceConfig,
    ) -> Self {
        tracing::info!(
            service = %config.service_name,
            version = %config.version,
            group = %config.group,
            timeout_ms = config.timeout.as_millis() as u64,
            retries = config.retries,
            local = config.enable_local_service,
            condition = %config.condition,
            "service client created"
        );
        ServiceClient {
            config,
            client,
            locals,
            conditions,
        }
    }

    pub fn config(&self) -> &ReferenceConfig {
        &self.config
    }

    /// Calls the method and converts the result to `T`; routine failures
    /// answer `T`'s friendly value instead of raising.
    pub async fn call<T>(&self, method: &str, params: Vec<Value>) -> T
    where
        T: DeserializeOwned + FriendlyValue,
    {
        match self.invoke(method, params).await {
            Ok(value) => match serde_json::from_value(value) {
                Ok(typed) => typed,
                Err(e) => {
                    tracing::warn!(
                        service = %self.config.service_name,
                        method,
                        "response did not match the expected type: {e}"
                    );
                    T::friendly(&format!("response type mismatch: {e}"))
                }
            },
            Err(e) => {
                tracing::warn!(
                    service = %self.config.service_name,
                    method,
                    "call degraded to friendly value: {e}"
                );
                T::friendly(&e.to_string())
            }
        }
    }

    /// The error-propagating async surface: same orchestration, but the
    /// caller observes failures through the returned future.
    pub async fn call_future(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.invoke(method, params).await
    }

    /// The shared call orchestration.
    async fn invoke(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let key = self.config.service_key();

        // Condition gate: false routes to the local implementation when one
        // exists; a missing local implementation falls through to remote.
        if self.config.enable_local_service {
            let remote = self.conditions.evaluate(&self.config.condition);
            if !remote {
                if let Some(local) = self.locals.get(&key) {
                    tracing::info!(%key, method, "condition routed call to local service");
                    return local
                        .invoke(method, &params)
                        .map_err(|e| RpcError::LocalInvocation(e.to_string()));
                }
                tracing::warn!(%key, "no local implementation, using remote despite condition");
            }
        }

        let request = RpcRequest::new(
            self.config.service_name.clone(),
            method,
            params.clone(),
            self.config.version.clone(),
            self.config.group.clone(),
        );

        let mut last_error = None;
        for attempt in 0..=self.config.retries {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF).await;
                tracing::info!(attempt, %key, method, "retrying call");
            }

            let pending = match self.client.send_request(&request).await {
                Ok(pending) => pending,
                Err(RpcError::ServiceNotFound(not_found)) => {
                    // No provider at all: fall back immediately, no retry.
                    return self.resolve_locally(
                        method,
                        &params,
                        RpcError::ServiceNotFound(not_found),
                    );
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(%key, method, "transport failure: {e}");
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return self.resolve_locally(method, &params, e),
            };

            return match pending.wait(self.config.timeout).await {
                Ok(response) => Ok(response.data),
                Err(e) => self.resolve_locally(method, &params, e),
            };
        }

        let error = last_error
            .unwrap_or_else(|| RpcError::Transport("call failed with no attempts made".into()));
        self.resolve_locally(method, &params, error)
    }

    /// Last-resort resolution: with local service enabled the resolver is
    /// consulted (local, fallback, zero default); otherwise the original
    /// error propagates for conversion to a friendly value.
    fn resolve_locally(
        &self,
        method: &str,
        params: &[Value],
        error: RpcError,
    ) -> Result<Value> {
        if !self.config.enable_local_service {
            return Err(error);
        }

        tracing::info!(
            service = %self.config.service_name,
            method,
            "remote path failed ({error}), resolving locally"
        );
        let service = self
            .locals
            .get_with_fallback(&self.config.service_key(), &self.config.service_name);
        service
            .invoke(method, params)
            .map_err(|e| RpcError::LocalInvocation(e.to_string()))
    }
}
