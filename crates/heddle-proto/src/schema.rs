//! Well-known `data_schema` URIs and the JSON Schema validators applied to
//! fabric frames.
//!
//! The envelope schema is checked on every frame, inbound and outbound. The
//! cnc data schema is checked on the `data` chunk of action requests before
//! typed deserialisation. Validators are compiled once on first use.

use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde_json::{Value, json};

use crate::error::ValidationError;

/// Protocol version carried in the envelope `version` field.
pub const ENVELOPE_VERSION: &str = "1";

/// Login payload schema.
pub const LOGIN_SCHEMA_URI: &str = "http://puppetlabs.com/loginschema";

/// Inbound action request payload schema.
pub const CNC_SCHEMA_URI: &str = "http://puppetlabs.com/cncschema";

/// Blocking reply payload schema.
pub const BLOCKING_RESPONSE_URI: &str = "http://puppetlabs.com/rpc_blocking_response";

/// Provisional reply payload schema.
pub const PROVISIONAL_RESPONSE_URI: &str = "http://puppetlabs.com/rpc_provisional_response";

/// Non-blocking final reply payload schema.
pub const NON_BLOCKING_RESPONSE_URI: &str = "http://puppetlabs.com/rpc_non_blocking_response";

/// Error reply payload schema.
pub const RPC_ERROR_URI: &str = "http://puppetlabs.com/rpc_error";

/// Kind of a self-generated message, keyed by its payload schema URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Session login announcement.
    Login,
    /// Final reply to a blocking request.
    BlockingResponse,
    /// Immediate acknowledgment of a non-blocking request.
    ProvisionalResponse,
    /// Final reply to a non-blocking request with `notify_outcome`.
    NonBlockingResponse,
    /// Structured error reply.
    RpcError,
}

impl MessageType {
    /// Returns the `data_schema` URI identifying this message kind.
    #[must_use]
    pub const fn uri(self) -> &'static str {
        match self {
            Self::Login => LOGIN_SCHEMA_URI,
            Self::BlockingResponse => BLOCKING_RESPONSE_URI,
            Self::ProvisionalResponse => PROVISIONAL_RESPONSE_URI,
            Self::NonBlockingResponse => NON_BLOCKING_RESPONSE_URI,
            Self::RpcError => RPC_ERROR_URI,
        }
    }
}

static ENVELOPE_VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    let schema = json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "fabric envelope",
        "type": "object",
        "required": [
            "id", "version", "expires", "sender",
            "endpoints", "hops", "data_schema", "data"
        ],
        "properties": {
            "id": {"type": "string", "minLength": 1},
            "version": {"type": "string", "minLength": 1},
            "expires": {"type": "string", "minLength": 1},
            "sender": {"type": "string", "minLength": 1},
            "endpoints": {"type": "array", "items": {"type": "string"}},
            "hops": {"type": "array"},
            "data_schema": {"type": "string", "minLength": 1},
            "data": {"type": "object"},
            "debug": {"type": "array"}
        }
    });
    jsonschema::validator_for(&schema).expect("envelope schema must be valid")
});

static CNC_DATA_VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    let schema = json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "cnc action request",
        "type": "object",
        "required": ["transaction_id", "module", "action", "params"],
        "properties": {
            "transaction_id": {"type": "string", "minLength": 1},
            "module": {"type": "string", "minLength": 1},
            "action": {"type": "string", "minLength": 1},
            "params": {},
            "notify_outcome": {"type": "boolean"}
        }
    });
    jsonschema::validator_for(&schema).expect("cnc data schema must be valid")
});

/// Validates a raw JSON value against the envelope schema.
///
/// # Errors
///
/// Returns [`ValidationError::Envelope`] listing every violation.
pub fn validate_envelope(value: &Value) -> Result<(), ValidationError> {
    let errors: Vec<String> = ENVELOPE_VALIDATOR
        .iter_errors(value)
        .map(|error| error.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Envelope { errors })
    }
}

/// Validates an action-request data chunk against the cnc schema.
///
/// # Errors
///
/// Returns [`ValidationError::Data`] listing every violation.
pub fn validate_cnc_data(value: &Value) -> Result<(), ValidationError> {
    let errors: Vec<String> = CNC_DATA_VALIDATOR
        .iter_errors(value)
        .map(|error| error.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Data {
            schema: CNC_SCHEMA_URI.to_string(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests;
