//! Request-level errors raised by module execution.
//!
//! Every variant here is a *request error* in the protocol sense: the
//! module or action rejected the input or failed during execution. For
//! blocking requests the caller translates the error into an `rpc_error`
//! reply; for non-blocking requests the action task emits the reply itself
//! and records the failure in the job's spool.

use std::path::PathBuf;

use thiserror::Error;

/// A module or action rejected the input or failed during execution.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// No module with the requested name is registered.
    #[error("unknown module '{name}'")]
    UnknownModule {
        /// Name that was looked up.
        name: String,
    },

    /// The module does not expose the requested action.
    #[error("unknown action '{action}' for module '{module}'")]
    UnknownAction {
        /// Module name.
        module: String,
        /// Action that was looked up.
        action: String,
    },

    /// The action rejected its parameters.
    #[error("invalid parameters for '{module} {action}': {message}")]
    InvalidParams {
        /// Module name.
        module: String,
        /// Action name.
        action: String,
        /// Description of the rejection.
        message: String,
    },

    /// An internal handler failed during execution.
    #[error("failed to run '{module} {action}': {message}")]
    Execution {
        /// Module name.
        module: String,
        /// Action name.
        action: String,
        /// Description of the failure.
        message: String,
    },

    /// The plugin process could not be spawned.
    #[error("failed to start plugin '{path}': {source}")]
    Spawn {
        /// Executable that failed to start.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred while communicating with the plugin process.
    #[error("I/O error communicating with plugin '{module}': {source}")]
    Io {
        /// Module name.
        module: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The plugin exited with a non-zero status code.
    #[error("plugin '{module}' exited with code {code}: {stderr_tail}")]
    NonZeroExit {
        /// Module name.
        module: String,
        /// Process exit code.
        code: i32,
        /// Trailing portion of the captured standard error (at most 4 KiB).
        stderr_tail: String,
    },

    /// The plugin exited successfully but its stdout is not a JSON document.
    #[error("plugin produced non-JSON output")]
    NonJsonOutput {
        /// Module name, kept for structured context.
        module: String,
    },

    /// The plugin did not complete within the configured timeout.
    #[error("plugin timed out after {timeout_secs}s")]
    Timeout {
        /// Module name, kept for structured context.
        module: String,
        /// Configured timeout in seconds.
        timeout_secs: u64,
    },

    /// Plugin introspection failed or produced an invalid declaration.
    #[error("failed to introspect plugin '{path}': {message}")]
    Metadata {
        /// Plugin executable.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A module descriptor violated a registry invariant.
    #[error("module registration failed: {message}")]
    Registration {
        /// Description of the violation.
        message: String,
    },
}
