//! # Plexus Core Errors
//!
//! Defines the recoverable error type returned by every fallible framework
//! operation.
//!
//! [`Error`] carries the context of the failure (plugin identifier, path,
//! message, underlying source) while [`ErrorKind`] classifies it into the
//! small set of status kinds callers usually branch on. Programming-contract
//! violations are not represented here; they are routed through
//! [`crate::kernel::fatal`] instead.
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::error::LoaderError;

/// Classification of an [`Error`].
///
/// The declaration order doubles as a severity order: operations that keep
/// going past individual failures (collection scans) report the greatest kind
/// they encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// Not enough memory or other operating system resources available
    Resource,
    /// The referenced object is unknown to the framework
    Unknown,
    /// An I/O error occurred
    Io,
    /// A malformed plugin descriptor was encountered
    Malformed,
    /// Plugin or symbol conflicts with another plugin or symbol
    Conflict,
    /// Plugin dependencies could not be satisfied
    Dependency,
    /// Plugin runtime signaled an error or could not be loaded
    Runtime,
}

/// Error type for plexus framework operations
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Resource exhausted: {message}")]
    Resource { message: String },

    #[error("Unknown {what}: '{id}'")]
    Unknown { what: &'static str, id: String },

    #[error("I/O error during '{operation}' on '{}': {source}", path.display())]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed plugin descriptor{}: {message}", path.as_ref().map(|p| format!(" '{}'", p.display())).unwrap_or_default())]
    Malformed {
        path: Option<PathBuf>,
        message: String,
    },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error("Runtime error in plugin '{plugin_id}': {message}")]
    Runtime {
        plugin_id: String,
        message: String,
        #[source]
        source: Option<LoaderError>,
    },
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl Error {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Resource { .. } => ErrorKind::Resource,
            Error::Unknown { .. } => ErrorKind::Unknown,
            Error::Io { .. } => ErrorKind::Io,
            Error::Malformed { .. } => ErrorKind::Malformed,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Dependency(_) => ErrorKind::Dependency,
            Error::Runtime { .. } => ErrorKind::Runtime,
        }
    }

    /// I/O failure on `path`. Running out of memory is reported as
    /// [`Error::Resource`].
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::OutOfMemory {
            return Error::Resource {
                message: format!("'{}' on '{}': {}", operation.into(), path.display(), source),
            };
        }
        Error::Io {
            operation: operation.into(),
            path,
            source,
        }
    }

    pub fn unknown_plugin(id: &str) -> Self {
        Error::Unknown { what: "plugin", id: id.to_string() }
    }

    pub fn malformed(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Error::Malformed { path, message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict { message: message.into() }
    }

    pub fn runtime(plugin_id: &str, message: impl Into<String>) -> Self {
        Error::Runtime {
            plugin_id: plugin_id.to_string(),
            message: message.into(),
            source: None,
        }
    }

    pub fn loader(plugin_id: &str, source: LoaderError) -> Self {
        Error::Runtime {
            plugin_id: plugin_id.to_string(),
            message: "runtime library could not be loaded".to_string(),
            source: Some(source),
        }
    }
}
