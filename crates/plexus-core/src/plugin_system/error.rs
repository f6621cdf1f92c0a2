//! # Plexus Plugin System Errors
//!
//! Errors raised by the native loader collaborator while opening plugin
//! runtime libraries and resolving their exported symbols. The engine wraps
//! them into [`crate::kernel::error::Error::Runtime`] together with the
//! identifier of the plugin being resolved.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("Failed to open runtime library '{}': {message}", path.display())]
    Open { path: PathBuf, message: String },

    #[error("Symbol '{symbol}' not found in runtime library '{library}'")]
    MissingSymbol { library: String, symbol: String },

    #[error("Runtime function table '{symbol}' in library '{library}' is invalid: {message}")]
    InvalidRuntime {
        library: String,
        symbol: String,
        message: String,
    },
}

impl LoaderError {
    /// Name or path of the library the error refers to.
    pub fn library(&self) -> String {
        match self {
            LoaderError::Open { path, .. } => path.display().to_string(),
            LoaderError::MissingSymbol { library, .. } | LoaderError::InvalidRuntime { library, .. } => library.clone(),
        }
    }
}
