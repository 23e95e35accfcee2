//! Release controller
//!
//! Installs, upgrades and removes releases with helm. Success means helm
//! accepted the change, not that the workload finished rolling out.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::domain::{AppDescriptor, StoreConfig};
use crate::error::{DeployError, Result};
use crate::process::{CommandRunner, ExternalCommand};

/// Drives helm releases for built packages
pub struct ReleaseController {
    runner: Arc<dyn CommandRunner>,
    helm: String,
}

impl ReleaseController {
    pub fn new(runner: Arc<dyn CommandRunner>, helm: impl Into<String>) -> Self {
        Self {
            runner,
            helm: helm.into(),
        }
    }

    /// Installs the package as release `descriptor.name`, or upgrades it if present
    ///
    /// The store configuration is passed through so the deployed workload can
    /// fetch its source archive after rollout.
    pub fn release(
        &self,
        package: &Path,
        descriptor: &AppDescriptor,
        store: &StoreConfig,
    ) -> Result<()> {
        let mut command = ExternalCommand::new(&self.helm)
            .arg("upgrade")
            .arg("--install")
            .arg("--set")
            .arg(format!("version={}", descriptor.version))
            .arg("--set")
            .sensitive_arg(format!("store.key={}", store.access_key))
            .arg("--set")
            .sensitive_arg(format!("store.secret={}", store.secret_key))
            .arg("--set")
            .arg(format!("store.service={}", store.service))
            .arg("--set")
            .arg(format!("store.namespace={}", store.namespace))
            .arg("-f")
            .arg(&descriptor.descriptor_path);
        command = with_namespace(command, &descriptor.namespace)
            .arg(&descriptor.name)
            .arg(package);

        self.runner.run(&command).map_err(|e| {
            DeployError::release(format!("helm upgrade of release {} failed", descriptor.name), e)
        })?;

        info!(
            "Release {} at version {} applied",
            descriptor.name, descriptor.version
        );
        Ok(())
    }

    /// Deletes release `descriptor.name` along with its history
    pub fn remove(&self, descriptor: &AppDescriptor) -> Result<()> {
        let command = ExternalCommand::new(&self.helm)
            .arg("uninstall")
            .arg(&descriptor.name);
        let command = with_namespace(command, &descriptor.namespace);

        self.runner.run(&command).map_err(|e| {
            DeployError::release(format!("helm delete of release {} failed", descriptor.name), e)
        })?;

        info!("Release {} removed", descriptor.name);
        Ok(())
    }
}

/// Scopes a command to `namespace`; an empty namespace leaves helm's default
fn with_namespace(command: ExternalCommand, namespace: &str) -> ExternalCommand {
    if namespace.is_empty() {
        command
    } else {
        command.arg("--namespace").arg(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{FakeRunner, descriptor_in};

    fn store() -> StoreConfig {
        StoreConfig::new("kubedeploy", "kubedeploy-minio", "kubedeploy-key", "kubedeploy-secret")
    }

    #[test]
    fn test_release_passes_version_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let app = descriptor_in(dir.path(), "api", "1.2.0", "prod");
        let runner = Arc::new(FakeRunner::new());
        let package = dir.path().join("api-1.2.0.tgz");

        ReleaseController::new(runner.clone(), "helm")
            .release(&package, &app, &store())
            .unwrap();

        let calls = runner.calls_to("helm", "upgrade");
        assert_eq!(calls.len(), 1);
        let descriptor_path = dir.path().join("app.yaml");
        assert_eq!(
            calls[0].args(),
            vec![
                "upgrade",
                "--install",
                "--set",
                "version=1.2.0",
                "--set",
                "store.key=kubedeploy-key",
                "--set",
                "store.secret=kubedeploy-secret",
                "--set",
                "store.service=kubedeploy-minio",
                "--set",
                "store.namespace=kubedeploy",
                "-f",
                descriptor_path.to_str().unwrap(),
                "--namespace",
                "prod",
                "api",
                package.to_str().unwrap(),
            ]
        );
    }

    #[test]
    fn test_release_hides_credentials_from_display() {
        let dir = tempfile::tempdir().unwrap();
        let app = descriptor_in(dir.path(), "api", "1.2.0", "prod");
        let runner = Arc::new(FakeRunner::new().failing_on("helm", "upgrade"));

        let err = ReleaseController::new(runner, "helm")
            .release(&dir.path().join("api-1.2.0.tgz"), &app, &store())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Release);
        let message = err.to_string();
        assert!(message.contains("release api"));
        assert!(!message.contains("kubedeploy-secret"));
        assert!(!message.contains("kubedeploy-key"));
    }

    #[test]
    fn test_remove_uninstalls_release() {
        let dir = tempfile::tempdir().unwrap();
        let app = descriptor_in(dir.path(), "api", "1.2.0", "prod");
        let runner = Arc::new(FakeRunner::new());

        ReleaseController::new(runner.clone(), "helm")
            .remove(&app)
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args(), vec!["uninstall", "api", "--namespace", "prod"]);
    }

    #[test]
    fn test_empty_namespace_omits_flag() {
        let dir = tempfile::tempdir().unwrap();
        let app = descriptor_in(dir.path(), "api", "1.2.0", "''");
        let runner = Arc::new(FakeRunner::new());

        ReleaseController::new(runner.clone(), "helm")
            .remove(&app)
            .unwrap();

        assert_eq!(runner.calls()[0].args(), vec!["uninstall", "api"]);
    }

    #[test]
    fn test_remove_failure_is_release_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = descriptor_in(dir.path(), "api", "1.2.0", "prod");
        let runner = Arc::new(FakeRunner::new().failing_on("helm", "uninstall"));

        let err = ReleaseController::new(runner, "helm")
            .remove(&app)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Release);
    }
}
