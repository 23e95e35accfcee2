//! Application descriptor
//!
//! The `app.yaml` document identifying one deployable application.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};

/// Longest release name the cluster release tool accepts
const MAX_NAME_LEN: usize = 53;

/// Application descriptor
///
/// Loaded once per invocation. Only `name` and `version` are required for
/// every operation; `source` is additionally required to deploy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppDescriptor {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub source: PathBuf,
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub build: Vec<String>,
    #[serde(default)]
    pub requirements: Vec<serde_yaml::Mapping>,

    /// File the descriptor was read from
    #[serde(skip)]
    pub descriptor_path: PathBuf,
}

impl AppDescriptor {
    /// Reads and parses a descriptor file
    ///
    /// Fields are not validated here; call [`AppDescriptor::validate`] or
    /// [`AppDescriptor::validate_for_deploy`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DeployError::config(format!("failed to read {}", path.display()), e)
        })?;

        let mut descriptor: AppDescriptor = serde_yaml::from_str(&content).map_err(|e| {
            DeployError::config(format!("failed to parse {}", path.display()), e)
        })?;
        descriptor.descriptor_path = path.to_path_buf();

        Ok(descriptor)
    }

    /// Validates the fields every operation depends on
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name).map_err(|msg| self.invalid("name", msg))?;
        validate_version(&self.version).map_err(|msg| self.invalid("version", msg))?;
        Ok(())
    }

    /// Validates the fields the deploy pipeline depends on
    pub fn validate_for_deploy(&self) -> Result<()> {
        self.validate()?;
        if self.source.as_os_str().is_empty() {
            return Err(self.invalid("source", "is required"));
        }
        Ok(())
    }

    /// Object key and package file name: `<name>-<version>.tgz`
    pub fn artifact_key(&self) -> String {
        format!("{}-{}.tgz", self.name, self.version)
    }

    /// File name of the descriptor, used when copying it into a package
    pub fn file_name(&self) -> &std::ffi::OsStr {
        self.descriptor_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new(crate::config::DEFAULT_APP_FILE))
    }

    fn invalid(&self, field: &str, message: &str) -> DeployError {
        DeployError::config(
            format!("invalid {} in {}", field, self.descriptor_path.display()),
            message,
        )
    }
}

fn validate_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("is required");
    }
    if name.len() > MAX_NAME_LEN {
        return Err("must be at most 53 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("may only contain lowercase letters, digits and '-'");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err("must start and end with a letter or digit");
    }
    Ok(())
}

fn validate_version(version: &str) -> std::result::Result<(), &'static str> {
    if version.is_empty() {
        return Err("is required");
    }
    if !version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'))
    {
        return Err("may only contain letters, digits, '.', '-', '_' and '+'");
    }
    if version.starts_with('.') || version.starts_with('-') {
        return Err("must not start with '.' or '-'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn write_descriptor(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("app.yaml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_full_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_descriptor(
            dir.path(),
            r#"
version: 1.2.0
name: api
namespace: prod
source: ./src
runtime: node
build:
  - npm install
  - npm run build
requirements:
  - name: redis
    version: 10.5.7
    repository: https://charts.bitnami.com/bitnami
"#,
        );

        let app = AppDescriptor::load(&path).unwrap();
        assert_eq!(app.name, "api");
        assert_eq!(app.version, "1.2.0");
        assert_eq!(app.namespace, "prod");
        assert_eq!(app.source, PathBuf::from("./src"));
        assert_eq!(app.runtime, "node");
        assert_eq!(app.build, vec!["npm install", "npm run build"]);
        assert_eq!(app.requirements.len(), 1);
        assert_eq!(app.descriptor_path, path);
        assert_eq!(app.artifact_key(), "api-1.2.0.tgz");
        assert!(app.validate_for_deploy().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppDescriptor::load(&dir.path().join("app.yaml")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.context().starts_with("failed to read"));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_descriptor(dir.path(), "name: [unterminated");
        let err = AppDescriptor::load(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.context().starts_with("failed to parse"));
    }

    #[test]
    fn test_missing_required_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_descriptor(dir.path(), "namespace: prod\n");
        let app = AppDescriptor::load(&path).unwrap();

        let err = app.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.context().contains("name"));
    }

    #[test]
    fn test_source_required_for_deploy_only() {
        let app = AppDescriptor {
            name: "api".to_string(),
            version: "1.2.0".to_string(),
            ..Default::default()
        };
        assert!(app.validate().is_ok());
        assert!(app.validate_for_deploy().is_err());
    }

    #[test]
    fn test_name_rules() {
        assert!(validate_name("api").is_ok());
        assert!(validate_name("my-api-2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("Api").is_err());
        assert!(validate_name("api_v2").is_err());
        assert!(validate_name("-api").is_err());
        assert!(validate_name("api/../x").is_err());
        assert!(validate_name(&"a".repeat(54)).is_err());
    }

    #[test]
    fn test_version_rules() {
        assert!(validate_version("1.2.0").is_ok());
        assert!(validate_version("1.2.0-rc.1+build.5").is_ok());
        assert!(validate_version("").is_err());
        assert!(validate_version("1.2/0").is_err());
        assert!(validate_version("1 2").is_err());
        assert!(validate_version("..").is_err());
    }
}
