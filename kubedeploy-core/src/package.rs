//! Package builder
//!
//! Turns the base chart into a chart for one application:
//! - `helm pull <template> --untar` into `<work_dir>/.template`
//! - rename the single chart directory to the application name
//! - rewrite `Chart.yaml` so the chart names itself after the application
//! - copy the raw descriptor into the chart
//! - write the application's requirements as the chart's dependencies
//! - `helm package` the result as `<work_dir>/<name>-<version>.tgz`

use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::AppDescriptor;
use crate::error::{DeployError, Result};
use crate::process::{CommandRunner, ExternalCommand};

/// Directory the template chart is unpacked into; the leading dot keeps it
/// from colliding with any valid application name
const TEMPLATE_DIR: &str = ".template";

/// Chart manifest file
const MANIFEST: &str = "Chart.yaml";

/// Chart dependency declaration file
const REQUIREMENTS: &str = "requirements.yaml";

/// Builds application packages from a template chart
pub struct PackageBuilder {
    runner: Arc<dyn CommandRunner>,
    helm: String,
}

impl PackageBuilder {
    pub fn new(runner: Arc<dyn CommandRunner>, helm: impl Into<String>) -> Self {
        Self {
            runner,
            helm: helm.into(),
        }
    }

    /// Builds `<work_dir>/<name>-<version>.tgz` from the chart at `template_uri`
    ///
    /// # Returns
    /// Path of the packaged chart
    pub fn build(
        &self,
        work_dir: &Path,
        template_uri: &str,
        descriptor: &AppDescriptor,
    ) -> Result<PathBuf> {
        let template_dir = work_dir.join(TEMPLATE_DIR);
        self.fetch(template_uri, &template_dir)?;

        let fetched = single_directory(&template_dir)?;
        let chart_dir = work_dir.join(&descriptor.name);
        fs::rename(&fetched, &chart_dir).map_err(|e| {
            DeployError::packaging(
                format!(
                    "chart rename {} -> {} failed",
                    fetched.display(),
                    chart_dir.display()
                ),
                e,
            )
        })?;
        debug!("Chart directory {}", chart_dir.display());

        rename_chart(&chart_dir, &descriptor.name)?;
        copy_descriptor(&chart_dir, descriptor)?;
        write_requirements(&chart_dir, &descriptor.requirements)?;

        self.package(work_dir, &chart_dir, &descriptor.version)?;

        let package = work_dir.join(descriptor.artifact_key());
        if !package.is_file() {
            return Err(DeployError::packaging(
                "helm package failed",
                format!("expected package {} was not produced", package.display()),
            ));
        }

        info!("Built package {}", package.display());
        Ok(package)
    }

    fn fetch(&self, template_uri: &str, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest).map_err(|e| {
            DeployError::packaging(format!("failed to create {}", dest.display()), e)
        })?;

        let command = ExternalCommand::new(&self.helm)
            .arg("pull")
            .arg(template_uri)
            .arg("-d")
            .arg(dest)
            .arg("--untar");

        self.runner
            .run(&command)
            .map_err(|e| DeployError::packaging(format!("helm fetch of {} failed", template_uri), e))
    }

    fn package(&self, out_dir: &Path, chart_dir: &Path, version: &str) -> Result<()> {
        let command = ExternalCommand::new(&self.helm)
            .arg("package")
            .arg("-d")
            .arg(out_dir)
            .arg("-u")
            .arg("--version")
            .arg(version)
            .arg(chart_dir);

        self.runner
            .run(&command)
            .map_err(|e| DeployError::packaging("helm package failed", e))
    }
}

/// Returns the only directory inside `dir`
///
/// Zero or several directories mean the template's own name cannot be
/// determined, which is an error rather than a guess.
fn single_directory(dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(dir)
        .map_err(|e| DeployError::packaging(format!("failed to read {}", dir.display()), e))?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| DeployError::packaging(format!("failed to read {}", dir.display()), e))?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }

    match dirs.len() {
        1 => Ok(dirs.remove(0)),
        0 => Err(DeployError::packaging(
            "template chart unpacked to no directory",
            format!("{} contains no chart", dir.display()),
        )),
        n => {
            dirs.sort();
            let names: Vec<String> = dirs
                .iter()
                .filter_map(|d| d.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .collect();
            Err(DeployError::packaging(
                "template chart unpacked to several directories",
                format!("expected one in {}, found {}: {}", dir.display(), n, names.join(", ")),
            ))
        }
    }
}

/// Sets the `name` field of the chart manifest, keeping everything else
fn rename_chart(chart_dir: &Path, name: &str) -> Result<()> {
    let manifest_path = chart_dir.join(MANIFEST);

    let content = fs::read_to_string(&manifest_path).map_err(|e| {
        DeployError::packaging(format!("failed to read {}", manifest_path.display()), e)
    })?;

    let mut manifest: Mapping = serde_yaml::from_str(&content).map_err(|e| {
        DeployError::packaging(format!("failed to parse {}", manifest_path.display()), e)
    })?;
    manifest.insert(Value::from("name"), Value::from(name));

    let content = serde_yaml::to_string(&manifest).map_err(|e| {
        DeployError::packaging(format!("failed to marshal {}", manifest_path.display()), e)
    })?;
    fs::write(&manifest_path, content).map_err(|e| {
        DeployError::packaging(format!("failed to write {}", manifest_path.display()), e)
    })
}

/// Copies the descriptor file byte for byte into the chart
fn copy_descriptor(chart_dir: &Path, descriptor: &AppDescriptor) -> Result<()> {
    let src = &descriptor.descriptor_path;
    let dst = chart_dir.join(descriptor.file_name());

    fs::copy(src, &dst).map(drop).map_err(|e| {
        DeployError::packaging(
            format!("failed to copy {} to {}", src.display(), dst.display()),
            e,
        )
    })
}

/// Replaces the chart's dependencies with the application's requirements
fn write_requirements(chart_dir: &Path, requirements: &[Mapping]) -> Result<()> {
    let path = chart_dir.join(REQUIREMENTS);

    let mut document = Mapping::new();
    document.insert(
        Value::from("dependencies"),
        Value::Sequence(requirements.iter().cloned().map(Value::Mapping).collect()),
    );

    let content = serde_yaml::to_string(&document)
        .map_err(|e| DeployError::packaging("failed to marshal requirements", e))?;
    fs::write(&path, content)
        .map_err(|e| DeployError::packaging(format!("failed to write {}", path.display()), e))
}
