//! Error kinds owned by the daemon.
//!
//! [`FatalError`] is unrecoverable at the subsystem level and terminates
//! the agent with a non-zero exit code. [`ProcessingError`] is recoverable
//! at the request processor: it surfaces as `success = false` on the
//! provisional reply and never tears anything down.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::spool::SpoolError;
use crate::telemetry::TelemetryError;

/// Unrecoverable failures that terminate the agent.
#[derive(Debug, Error)]
pub enum FatalError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: heddle_config::ConfigError,
    },

    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },

    /// The spool root could not be created at startup.
    #[error("failed to create the spool directory '{path}': {source}")]
    SpoolSetup {
        /// Configured spool root.
        path: PathBuf,
        /// Underlying spool error.
        #[source]
        source: SpoolError,
    },

    /// TLS material could not be loaded or assembled into a connector.
    #[error("failed to configure the secure channel: {message}")]
    Tls {
        /// Description of the failure.
        message: String,
    },

    /// The initial connection to the broker failed.
    #[error("failed to connect to the broker: {message}")]
    Connect {
        /// Description of the failure.
        message: String,
    },

    /// A reconnection attempt raised a connection error.
    #[error("failed to reconnect to the broker: {message}")]
    Reconnect {
        /// Description of the failure.
        message: String,
    },

    /// The login exchange failed.
    #[error("failed to log in to the broker: {message}")]
    Login {
        /// Description of the failure.
        message: String,
    },

    /// A self-generated envelope failed schema validation.
    #[error("self-generated envelope failed schema validation: {}", errors.join("; "))]
    OutboundEnvelope {
        /// Every violation reported by the validator.
        errors: Vec<String>,
    },

    /// Signal handlers could not be installed.
    #[error("failed to install signal handlers: {source}")]
    Signals {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// A request could not be set up for processing.
///
/// Raised when the job spool cannot be created or the action task cannot
/// be spawned; reported to the requester on the provisional reply.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcessingError {
    message: String,
}

impl ProcessingError {
    /// Creates a processing error with the given description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the description.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}
