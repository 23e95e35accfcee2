//! Kubedeploy Core
//!
//! Deploys an application described by an `app.yaml` descriptor to a
//! Kubernetes cluster.
//!
//! This crate contains:
//! - Domain types: descriptor, store configuration, run reports
//! - Components: tunnel manager, artifact publisher, package builder,
//!   release controller
//! - Pipeline: sequences the components into `deploy` and `delete`
//!
//! External tools (`helm`, `kubectl`, `tar`) are driven through
//! [`process::CommandRunner`] and the object store through
//! [`store::StoreConnector`], so both can be replaced in tests.

pub mod config;
pub mod domain;
pub mod error;
pub mod package;
pub mod pipeline;
pub mod process;
pub mod publish;
pub mod release;
pub mod store;
pub mod tunnel;

#[cfg(test)]
mod testing;

pub use config::PipelineConfig;
pub use domain::{AppDescriptor, DeployReport, RemovalReport, StoreConfig};
pub use error::{DeployError, ErrorKind};
pub use pipeline::{DeployPipeline, PipelineError, Stage};
