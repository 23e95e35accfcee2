//! Pipeline configuration
//!
//! Every tunable the pipeline depends on: where the descriptor lives, which
//! base chart to extend, which store to publish to and which external tools
//! to drive. Values are threaded through constructors rather than kept as
//! globals so tests and parallel invocations can use their own.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::StoreConfig;
use crate::error::{DeployError, Result};

/// Descriptor file name looked up in the current directory
pub const DEFAULT_APP_FILE: &str = "app.yaml";

/// Bucket source archives are published to
pub const DEFAULT_BUCKET: &str = "builds";

/// Port the object store listens on inside the cluster
pub const DEFAULT_STORE_PORT: u16 = 9000;

/// Local end of the port-forward
pub const DEFAULT_TUNNEL_PORT: u16 = 9000;

/// Region used when signing store requests
pub const DEFAULT_STORE_REGION: &str = "us-east-1";

/// Binaries of the external tools the pipeline drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub helm: String,
    pub kubectl: String,
    pub tar: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            helm: "helm".to_string(),
            kubectl: "kubectl".to_string(),
            tar: "tar".to_string(),
        }
    }
}

/// Bounded exponential backoff for reaching the store through a fresh tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the given retry (1-based), doubling up to `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Chart every application package is built from
    pub base_chart: String,

    /// Path of the application descriptor
    pub descriptor_path: PathBuf,

    /// Object store the source archive is published to
    pub store: StoreConfig,

    /// Bucket holding source archives
    pub bucket: String,

    /// Region used to sign store requests
    pub store_region: String,

    /// Port the store listens on inside the cluster
    pub store_port: u16,

    /// Local port the tunnel binds
    pub tunnel_port: u16,

    /// Directory working directories are created in (system temp dir if unset)
    pub work_root: Option<PathBuf>,

    pub tools: ToolPaths,

    pub connect_retry: RetryPolicy,
}

impl PipelineConfig {
    /// Creates a configuration with defaults for everything but the chart and store
    pub fn new(base_chart: impl Into<String>, store: StoreConfig) -> Self {
        Self {
            base_chart: base_chart.into(),
            descriptor_path: PathBuf::from(DEFAULT_APP_FILE),
            store,
            bucket: DEFAULT_BUCKET.to_string(),
            store_region: DEFAULT_STORE_REGION.to_string(),
            store_port: DEFAULT_STORE_PORT,
            tunnel_port: DEFAULT_TUNNEL_PORT,
            work_root: None,
            tools: ToolPaths::default(),
            connect_retry: RetryPolicy::default(),
        }
    }

    pub fn with_descriptor_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.descriptor_path = path.into();
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_ports(mut self, tunnel_port: u16, store_port: u16) -> Self {
        self.tunnel_port = tunnel_port;
        self.store_port = store_port;
        self
    }

    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    pub fn with_connect_retry(mut self, retry: RetryPolicy) -> Self {
        self.connect_retry = retry;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| DeployError::config("invalid configuration", msg);

        if self.base_chart.trim().is_empty() {
            return Err(invalid("base chart cannot be empty"));
        }
        if self.descriptor_path.as_os_str().is_empty() {
            return Err(invalid("descriptor path cannot be empty"));
        }
        if self.store.namespace.is_empty() || self.store.service.is_empty() {
            return Err(invalid("store namespace and service are required"));
        }
        if self.bucket.is_empty() {
            return Err(invalid("bucket cannot be empty"));
        }
        if self.store_port == 0 || self.tunnel_port == 0 {
            return Err(invalid("ports must be greater than 0"));
        }
        if self.tools.helm.is_empty() || self.tools.kubectl.is_empty() || self.tools.tar.is_empty()
        {
            return Err(invalid("tool binaries cannot be empty"));
        }
        if self.connect_retry.attempts == 0 {
            return Err(invalid("store connect attempts must be at least 1"));
        }

        Ok(())
    }
}
