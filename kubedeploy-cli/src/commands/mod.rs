//! Commands module
//!
//! Defines the CLI commands and routes them to their handlers.

mod delete;
mod deploy;

use anyhow::{Context, Result};
use clap::Subcommand;
use kubedeploy_core::process::SystemRunner;
use kubedeploy_core::store::S3Connector;
use kubedeploy_core::{DeployPipeline, PipelineConfig};
use std::sync::Arc;

/// Top-level CLI commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Deploy the project in the current directory to the current cluster
    Deploy {
        /// Print the deploy report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the project's release from the current cluster
    Delete,
}

/// Handle a CLI command
///
/// Wires the pipeline against the local tools and the object store, then
/// routes the command to its handler.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - Pipeline configuration built from the global flags
pub async fn handle_command(command: Commands, config: PipelineConfig) -> Result<()> {
    let runner = Arc::new(SystemRunner::new());
    let connector = Arc::new(S3Connector::new().context("Failed to initialize store client")?);
    let pipeline = DeployPipeline::new(config, runner, connector);

    match command {
        Commands::Deploy { json } => deploy::handle_deploy(&pipeline, json).await,
        Commands::Delete => delete::handle_delete(&pipeline),
    }
}
