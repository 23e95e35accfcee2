//! Object store connection parameters

use std::fmt;

/// Connection parameters for the in-cluster object store
///
/// Constructed once per invocation from operator configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Namespace the store service runs in
    pub namespace: String,
    /// Name of the store service
    pub service: String,
    pub access_key: String,
    pub secret_key: String,
}

impl StoreConfig {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("namespace", &self.namespace)
            .field("service", &self.service)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
