//! # Plexus Core Kernel
//!
//! Process-wide plumbing shared by every environment: the error types, the
//! fail-fast contract handler, the registry of live environments and the
//! reentrant monitor that serializes access to one environment.
//!
//! - **[`constants`]**: framework name, version and descriptor file names.
//! - **[`error`]**: [`Error`](error::Error), [`ErrorKind`](error::ErrorKind)
//!   and the crate-wide `Result` alias.
//! - **[`fatal`]**: contract-violation reporting.
//! - **[`framework`]**: lazily created registry of live environments.
//! - **[`monitor`]**: recursive lock with wait/signal semantics.
pub mod constants;
pub mod error;
pub mod fatal;
pub mod framework;
pub mod monitor;
