//! Pipeline run reports

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// Object written to the store by a publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedArtifact {
    pub bucket: String,
    pub key: String,
    /// Local archive that was uploaded
    pub archive: PathBuf,
}

/// Summary of a successful deploy
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub run_id: Uuid,
    pub name: String,
    pub version: String,
    pub namespace: String,
    pub work_dir: PathBuf,
    pub artifact: PublishedArtifact,
    pub package: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Summary of a successful removal
#[derive(Debug, Clone, Serialize)]
pub struct RemovalReport {
    pub run_id: Uuid,
    pub name: String,
    pub namespace: String,
}
