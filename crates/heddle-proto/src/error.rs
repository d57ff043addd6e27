//! Validation errors raised while admitting fabric frames.

use thiserror::Error;

/// An inbound or outbound frame failed structural validation.
///
/// Inbound frames failing validation are dropped with an error log and no
/// reply; an outbound failure indicates a programming error and is escalated
/// by the sender.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The frame is not valid JSON.
    #[error("failed to parse frame as JSON: {source}")]
    Json {
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The envelope failed schema validation.
    #[error("envelope failed schema validation: {}", errors.join("; "))]
    Envelope {
        /// Every violation reported by the validator.
        errors: Vec<String>,
    },

    /// A data chunk failed validation against its declared schema.
    #[error("data chunk failed validation against '{schema}': {}", errors.join("; "))]
    Data {
        /// Schema URI the chunk was checked against.
        schema: String,
        /// Every violation reported by the validator.
        errors: Vec<String>,
    },

    /// The envelope declares a payload schema the receiver does not handle.
    #[error("unexpected data schema '{schema}'")]
    UnexpectedSchema {
        /// Declared schema URI.
        schema: String,
    },

    /// A schema-valid chunk failed typed deserialisation.
    #[error("failed to deserialise validated chunk: {source}")]
    Deserialize {
        /// Underlying deserialisation error.
        #[source]
        source: serde_json::Error,
    },
}
