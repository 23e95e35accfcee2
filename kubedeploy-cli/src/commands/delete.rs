//! Delete command handler

use anyhow::Result;
use colored::*;
use kubedeploy_core::DeployPipeline;

use super::deploy::namespace_label;

/// Removes the application's release
pub fn handle_delete(pipeline: &DeployPipeline) -> Result<()> {
    let report = pipeline.remove()?;

    println!(
        "{}",
        format!("✓ Release {} deleted", report.name).green().bold()
    );
    println!("  Namespace: {}", namespace_label(&report.namespace));

    Ok(())
}
