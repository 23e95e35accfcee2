//! Deploy pipeline
//!
//! Sequences a deploy as
//! `Start -> DescriptorLoaded -> Published -> PackageBuilt -> Released`
//! and a removal as `Start -> DescriptorLoaded -> Removed`.
//!
//! The first failing stage halts the run. Nothing that already happened is
//! undone: a published archive stays in the store if the build that follows
//! fails, and re-running overwrites it.

use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::domain::{AppDescriptor, DeployReport, RemovalReport};
use crate::error::{DeployError, ErrorKind};
use crate::package::PackageBuilder;
use crate::process::CommandRunner;
use crate::publish::ArtifactPublisher;
use crate::release::ReleaseController;
use crate::store::StoreConnector;
use crate::tunnel::TunnelManager;

/// Prefix of working directory names
const WORK_DIR_PREFIX: &str = "kubedeploy-";

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    DescriptorLoaded,
    Published,
    PackageBuilt,
    Released,
    Removed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "prepare working directory",
            Stage::DescriptorLoaded => "load descriptor",
            Stage::Published => "publish source",
            Stage::PackageBuilt => "build package",
            Stage::Released => "release",
            Stage::Removed => "remove release",
        };
        f.write_str(name)
    }
}

/// A pipeline halted at `stage`
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct PipelineError {
    pub stage: Stage,
    pub error: DeployError,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T> AtStage<T> for Result<T, DeployError> {
    fn at(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|error| PipelineError { stage, error })
    }
}

/// Runs deploys and removals for the application described by the config
pub struct DeployPipeline {
    config: PipelineConfig,
    publisher: ArtifactPublisher,
    builder: PackageBuilder,
    releases: ReleaseController,
}

impl DeployPipeline {
    /// Wires the pipeline components from configuration
    ///
    /// # Arguments
    /// * `config` - Pipeline configuration
    /// * `runner` - Runner for every external tool
    /// * `connector` - Object store client factory
    pub fn new(
        config: PipelineConfig,
        runner: Arc<dyn CommandRunner>,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        let tunnels = TunnelManager::new(runner.clone(), &config.tools.kubectl, config.tunnel_port);
        let publisher = ArtifactPublisher::new(
            runner.clone(),
            tunnels,
            connector,
            &config.tools.tar,
            &config.bucket,
            config.store_port,
        )
        .with_region(&config.store_region)
        .with_retry(config.connect_retry.clone());
        let builder = PackageBuilder::new(runner.clone(), &config.tools.helm);
        let releases = ReleaseController::new(runner, &config.tools.helm);

        Self {
            config,
            publisher,
            builder,
            releases,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Publishes, builds and releases the application
    pub async fn deploy(&self) -> Result<DeployReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("deploy", %run_id);
        self.run_deploy(run_id).instrument(span).await
    }

    async fn run_deploy(&self, run_id: Uuid) -> Result<DeployReport, PipelineError> {
        let started_at = Utc::now();

        self.config.validate().at(Stage::Start)?;
        let work_dir = self.create_work_dir().at(Stage::Start)?;
        info!("Working directory {}", work_dir.display());

        let descriptor = self
            .load_descriptor()
            .and_then(|d| d.validate_for_deploy().map(|_| d))
            .at(Stage::DescriptorLoaded)?;
        info!(
            "Deploying {} version {} to namespace {}",
            descriptor.name,
            descriptor.version,
            display_namespace(&descriptor.namespace)
        );

        info!("Packaging code into {}", work_dir.display());
        let artifact = self
            .publisher
            .publish(&work_dir, &descriptor, &self.config.store)
            .await
            .at(Stage::Published)?;

        info!("Building a chart from {}", self.config.base_chart);
        let package = self
            .builder
            .build(&work_dir, &self.config.base_chart, &descriptor)
            .at(Stage::PackageBuilt)?;

        info!("Releasing chart {}", package.display());
        self.releases
            .release(&package, &descriptor, &self.config.store)
            .at(Stage::Released)?;

        info!("Deploy complete");
        Ok(DeployReport {
            run_id,
            name: descriptor.name,
            version: descriptor.version,
            namespace: descriptor.namespace,
            work_dir,
            artifact,
            package,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Deletes the application's release; never packages or publishes
    pub fn remove(&self) -> Result<RemovalReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let _span = info_span!("delete", %run_id).entered();

        self.config.validate().at(Stage::Start)?;
        let descriptor = self
            .load_descriptor()
            .and_then(|d| d.validate().map(|_| d))
            .at(Stage::DescriptorLoaded)?;
        info!(
            "Removing release {} from namespace {}",
            descriptor.name,
            display_namespace(&descriptor.namespace)
        );

        self.releases.remove(&descriptor).at(Stage::Removed)?;

        info!("Delete complete");
        Ok(RemovalReport {
            run_id,
            name: descriptor.name,
            namespace: descriptor.namespace,
        })
    }

    fn load_descriptor(&self) -> Result<AppDescriptor, DeployError> {
        AppDescriptor::load(&self.config.descriptor_path)
    }

    /// Creates a fresh working directory that outlives the pipeline
    fn create_work_dir(&self) -> Result<PathBuf, DeployError> {
        let root = self
            .config
            .work_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        tempfile::Builder::new()
            .prefix(WORK_DIR_PREFIX)
            .tempdir_in(&root)
            .map(|dir| dir.keep())
            .map_err(|e| {
                DeployError::packaging(
                    format!("failed to create working directory in {}", root.display()),
                    e,
                )
            })
    }
}

fn display_namespace(namespace: &str) -> &str {
    if namespace.is_empty() { "<default>" } else { namespace }
}
