//! Core domain types
//!
//! The descriptor of the application being deployed, the store it publishes
//! to, and the reports produced by a pipeline run.

pub mod descriptor;
pub mod report;
pub mod store;

pub use descriptor::AppDescriptor;
pub use report::{DeployReport, PublishedArtifact, RemovalReport};
pub use store::StoreConfig;
