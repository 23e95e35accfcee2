//! Configuration module
//!
//! Global flags shared by every command and their mapping onto the
//! pipeline configuration.

use clap::Args;
use kubedeploy_core::PipelineConfig;
use kubedeploy_core::StoreConfig;
use kubedeploy_core::config::{
    DEFAULT_APP_FILE, DEFAULT_BUCKET, DEFAULT_STORE_PORT, DEFAULT_STORE_REGION,
    DEFAULT_TUNNEL_PORT, RetryPolicy, ToolPaths,
};
use std::path::PathBuf;

/// Base chart released alongside this version of the tool
pub const DEFAULT_BASE_CHART: &str = concat!(
    "https://github.com/ColDog/kubedeploy/releases/download/",
    env!("CARGO_PKG_VERSION"),
    "/app-",
    env!("CARGO_PKG_VERSION"),
    ".tgz"
);

/// Flags accepted by every command
#[derive(Args, Clone)]
pub struct GlobalArgs {
    /// Base chart which is extended with unique app definitions
    #[arg(long, global = true, env = "KUBEDEPLOY_BASE_CHART", default_value = DEFAULT_BASE_CHART)]
    pub base_chart: String,

    /// Object store namespace
    #[arg(long, global = true, env = "KUBEDEPLOY_STORE_NAMESPACE", default_value = "kubedeploy")]
    pub store_namespace: String,

    /// Object store service name
    #[arg(long, global = true, env = "KUBEDEPLOY_STORE_SERVICE", default_value = "kubedeploy-minio")]
    pub store_service: String,

    /// Object store access key
    #[arg(
        long,
        global = true,
        env = "KUBEDEPLOY_STORE_ACCESS_KEY",
        default_value = "kubedeploy-key",
        hide_env_values = true
    )]
    pub store_access_key: String,

    /// Object store secret access key
    #[arg(
        long,
        global = true,
        env = "KUBEDEPLOY_STORE_SECRET_KEY",
        default_value = "kubedeploy-secret",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub store_secret_key: String,

    /// Bucket source archives are published to
    #[arg(long, global = true, env = "KUBEDEPLOY_BUCKET", default_value = DEFAULT_BUCKET)]
    pub bucket: String,

    /// Local port the store is forwarded to
    #[arg(long, global = true, env = "KUBEDEPLOY_TUNNEL_PORT", default_value_t = DEFAULT_TUNNEL_PORT)]
    pub tunnel_port: u16,

    /// Port the store listens on inside the cluster
    #[arg(long, global = true, env = "KUBEDEPLOY_STORE_PORT", default_value_t = DEFAULT_STORE_PORT)]
    pub store_port: u16,

    /// Region used to sign store requests
    #[arg(long, global = true, env = "KUBEDEPLOY_STORE_REGION", default_value = DEFAULT_STORE_REGION)]
    pub store_region: String,

    /// Attempts made to reach the store once the tunnel is started
    #[arg(
        long,
        global = true,
        env = "KUBEDEPLOY_STORE_CONNECT_ATTEMPTS",
        default_value_t = RetryPolicy::default().attempts
    )]
    pub store_connect_attempts: u32,

    /// Application descriptor
    #[arg(long, global = true, env = "KUBEDEPLOY_APP_FILE", default_value = DEFAULT_APP_FILE)]
    pub app_file: PathBuf,

    /// Directory working directories are created in
    #[arg(long, global = true, env = "KUBEDEPLOY_WORK_ROOT")]
    pub work_root: Option<PathBuf>,

    /// helm binary
    #[arg(long, global = true, env = "KUBEDEPLOY_HELM_BIN", default_value = "helm")]
    pub helm_bin: String,

    /// kubectl binary
    #[arg(long, global = true, env = "KUBEDEPLOY_KUBECTL_BIN", default_value = "kubectl")]
    pub kubectl_bin: String,

    /// tar binary
    #[arg(long, global = true, env = "KUBEDEPLOY_TAR_BIN", default_value = "tar")]
    pub tar_bin: String,
}

impl GlobalArgs {
    /// Builds the pipeline configuration from the parsed flags
    pub fn pipeline_config(&self) -> PipelineConfig {
        let store = StoreConfig::new(
            &self.store_namespace,
            &self.store_service,
            &self.store_access_key,
            &self.store_secret_key,
        );

        let mut config = PipelineConfig::new(&self.base_chart, store)
            .with_descriptor_path(&self.app_file)
            .with_bucket(&self.bucket)
            .with_ports(self.tunnel_port, self.store_port)
            .with_connect_retry(RetryPolicy {
                attempts: self.store_connect_attempts,
                ..RetryPolicy::default()
            });

        if let Some(root) = &self.work_root {
            config = config.with_work_root(root);
        }
        config.store_region = self.store_region.clone();
        config.tools = ToolPaths {
            helm: self.helm_bin.clone(),
            kubectl: self.kubectl_bin.clone(),
            tar: self.tar_bin.clone(),
        };

        config
    }
}
