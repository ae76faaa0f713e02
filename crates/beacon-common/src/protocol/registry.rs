use serde::{Deserialize, Serialize};

/// Derives the canonical service key `name_version_group`.
///
/// `None` and empty version/group are both normalized to the empty string
/// before derivation, so every role computes the identical key. An empty
/// service name yields an empty key; the registry synthesizes a placeholder
/// at its boundary in that case.
pub fn service_key(name: &str, version: Option<&str>, group: Option<&str>) -> String {
    if name.is_empty() {
        return String::new();
    }
    let version = version.unwrap_or("");
    let group = group.unwrap_or("");
    format!("{name}_{version}_{group}")
}

/// A provider endpoint for one service, as stored by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInfo {
    pub service_name: String,
    pub version: String,
    pub group: String,
    /// Endpoint in `host:port` form.
    pub address: String,
    /// Load-balancing weight; accepted on the wire but unused by the
    /// uniform-random balancer.
    pub weight: u32,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        ServiceInfo {
            service_name: String::new(),
            version: String::new(),
            group: String::new(),
            address: String::new(),
            weight: 1,
        }
    }
}

impl ServiceInfo {
    pub fn new(
        service_name: impl Into<String>,
        version: impl Into<String>,
        group: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        ServiceInfo {
            service_name: service_name.into(),
            version: version.into(),
            group: group.into(),
            address: address.into(),
            weight: 1,
        }
    }

    pub fn service_key(&self) -> String {
        service_key(&self.service_name, Some(&self.version), Some(&self.group))
    }
}

/// Query for all providers of a `(name, version, group)` triple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LookupRequest {
    pub service_name: String,
    pub version: Option<String>,
    pub group: Option<String>,
}

impl LookupRequest {
    pub fn new(
        service_name: impl Into<String>,
        version: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        LookupRequest {
            service_name: service_name.into(),
            version: Some(version.into()),
            group: Some(group.into()),
        }
    }

    pub fn service_key(&self) -> String {
        service_key(
            &self.service_name,
            self.version.as_deref(),
            self.group.as_deref(),
        )
    }
}

/// Ordered provider list answering a [`LookupRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LookupResponse {
    pub services: Vec<ServiceInfo>,
}
