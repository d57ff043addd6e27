//! The result of a successfully executed action.

use serde_json::Value;

/// Outcome of an action execution.
///
/// Internal actions return a structured value directly. External actions
/// additionally carry the raw streams and exit code of the plugin process;
/// `results` is the structured value parsed from stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Produced by a built-in handler.
    Internal {
        /// Structured value returned by the handler.
        results: Value,
    },
    /// Produced by an external plugin process.
    External {
        /// Captured standard output, verbatim.
        stdout: Vec<u8>,
        /// Captured standard error, verbatim.
        stderr: Vec<u8>,
        /// Process exit code (zero on this path).
        exit_code: i32,
        /// Structured value parsed from stdout.
        results: Value,
    },
}

impl ActionOutcome {
    /// Returns the structured results, regardless of origin.
    #[must_use]
    pub const fn results(&self) -> &Value {
        match self {
            Self::Internal { results } | Self::External { results, .. } => results,
        }
    }
}
