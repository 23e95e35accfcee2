//! Deploy command handler

use anyhow::Result;
use colored::*;
use kubedeploy_core::{DeployPipeline, DeployReport};

/// Runs the deploy pipeline and prints its report
pub async fn handle_deploy(pipeline: &DeployPipeline, json: bool) -> Result<()> {
    let report = pipeline.deploy().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &DeployReport) {
    let elapsed = report.finished_at - report.started_at;

    println!(
        "{}",
        format!("✓ Deployed {} {}", report.name, report.version)
            .green()
            .bold()
    );
    println!("  Run:       {}", report.run_id.to_string().cyan());
    println!("  Namespace: {}", namespace_label(&report.namespace));
    println!(
        "  Source:    {}",
        format!("{}/{}", report.artifact.bucket, report.artifact.key).dimmed()
    );
    println!("  Package:   {}", report.package.display().to_string().dimmed());
    println!("  Work dir:  {}", report.work_dir.display().to_string().dimmed());
    println!(
        "  Took:      {}",
        format!("{:.1}s", elapsed.num_milliseconds() as f64 / 1000.0).dimmed()
    );
}

/// Namespace for display; empty means the cluster default
pub fn namespace_label(namespace: &str) -> String {
    if namespace.is_empty() {
        "(default)".dimmed().to_string()
    } else {
        namespace.bold().to_string()
    }
}
