//! Fail-fast handling of programming-contract violations.
//!
//! Calling a restricted operation from inside a plugin hook, releasing an
//! information object that was never handed out or operating on a destroyed
//! context are not recoverable errors: the graph invariants may already be
//! broken. Such violations are reported through [`fatal`], which logs the
//! message, hands it to the installed [`FatalHandler`] and aborts the process
//! if the handler returns.
use std::sync::{PoisonError, RwLock};

/// Handler invoked with the message of a contract violation.
///
/// The handler may panic to unwind out of the offending call (tests do this);
/// if it returns, the process is aborted.
pub type FatalHandler = fn(&str);

static FATAL_HANDLER: RwLock<Option<FatalHandler>> = RwLock::new(None);

/// Installs a process-wide fatal error handler, or restores the default
/// (log and abort) when `None` is given.
pub fn set_fatal_error_handler(handler: Option<FatalHandler>) {
    *FATAL_HANDLER.write().unwrap_or_else(PoisonError::into_inner) = handler;
}

/// Reports a contract violation and never returns normally.
pub(crate) fn fatal(message: impl AsRef<str>) -> ! {
    let message = message.as_ref();
    log::error!("Fatal framework error: {}", message);
    let handler = *FATAL_HANDLER.read().unwrap_or_else(PoisonError::into_inner);
    if let Some(handler) = handler {
        handler(message);
    }
    std::process::abort()
}
