//! Error types for deploy operations
//!
//! Every failure is tagged with the kind of operation that failed and the
//! context it failed in (which path, which tool). Formatting the message for
//! an operator is left to the caller.

use std::fmt;
use thiserror::Error;

/// Result type alias for deploy operations
pub type Result<T> = std::result::Result<T, DeployError>;

/// Broad classification of a deploy failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Descriptor or configuration missing, unreadable or malformed
    Config,
    /// Archive, template or package build failure
    Packaging,
    /// Tunnel establishment failure
    Transport,
    /// Bucket or upload failure
    Store,
    /// Install, upgrade or delete failure
    Release,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::Packaging => "packaging",
            ErrorKind::Transport => "transport",
            ErrorKind::Store => "store",
            ErrorKind::Release => "release",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while deploying or removing an application
#[derive(Debug, Error)]
pub enum DeployError {
    /// Descriptor or configuration problem, raised before any side effect
    #[error("{context}: {message}")]
    Config { context: String, message: String },

    /// Source archive, template fetch or package build failed
    #[error("{context}: {message}")]
    Packaging { context: String, message: String },

    /// Port-forward could not be established
    #[error("{context}: {message}")]
    Transport { context: String, message: String },

    /// Object store rejected or could not serve a request
    #[error("{context}: {message}")]
    Store { context: String, message: String },

    /// The cluster release tool failed
    #[error("{context}: {message}")]
    Release { context: String, message: String },
}

impl DeployError {
    /// Create a config error
    pub fn config(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Config {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a packaging error
    pub fn packaging(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Packaging {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a transport error
    pub fn transport(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Transport {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a store error
    pub fn store(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Store {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a release error
    pub fn release(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Release {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// The kind of operation that failed
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Packaging { .. } => ErrorKind::Packaging,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Store { .. } => ErrorKind::Store,
            Self::Release { .. } => ErrorKind::Release,
        }
    }

    /// Context the error was raised in
    pub fn context(&self) -> &str {
        match self {
            Self::Config { context, .. }
            | Self::Packaging { context, .. }
            | Self::Transport { context, .. }
            | Self::Store { context, .. }
            | Self::Release { context, .. } => context,
        }
    }
}
