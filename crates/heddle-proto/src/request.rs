//! Typed view of an inbound action request.
//!
//! A [`ParsedRequest`] is produced from a schema-validated envelope whose
//! `data_schema` is the cnc schema. It bundles the envelope fields the
//! request processor needs (request id, requester, debug chunks) with the
//! typed [`ActionRequest`] data chunk.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::ValidationError;
use crate::schema::{self, CNC_SCHEMA_URI};

/// The data chunk of an action request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRequest {
    transaction_id: String,
    module: String,
    action: String,
    params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notify_outcome: Option<bool>,
}

impl ActionRequest {
    /// Creates an action request data chunk.
    #[must_use]
    pub fn new(
        transaction_id: impl Into<String>,
        module: impl Into<String>,
        action: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            module: module.into(),
            action: action.into(),
            params,
            notify_outcome: None,
        }
    }

    /// Marks the request non-blocking with the given notification flag.
    #[must_use]
    pub const fn with_notify_outcome(mut self, notify: bool) -> Self {
        self.notify_outcome = Some(notify);
        self
    }

    /// Returns the requester-assigned transaction id.
    #[must_use]
    pub fn transaction_id(&self) -> &str {
        self.transaction_id.as_str()
    }

    /// Returns the target module name.
    #[must_use]
    pub fn module(&self) -> &str {
        self.module.as_str()
    }

    /// Returns the target action name.
    #[must_use]
    pub fn action(&self) -> &str {
        self.action.as_str()
    }

    /// Returns the action parameters.
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }

    /// A request carrying a `notify_outcome` field (of either value) is
    /// processed on the non-blocking path; one omitting it runs inline.
    #[must_use]
    pub const fn is_non_blocking(&self) -> bool {
        self.notify_outcome.is_some()
    }

    /// Whether the requester asked for a completion reply.
    #[must_use]
    pub fn notify_outcome(&self) -> bool {
        self.notify_outcome.unwrap_or(false)
    }

    /// Serialised parameters for the spool status record, or the literal
    /// `"none"` when the request carried no parameters.
    #[must_use]
    pub fn params_text(&self) -> String {
        if self.params.is_null() || self.params == Value::Object(serde_json::Map::new()) {
            return String::from("none");
        }
        serde_json::to_string(&self.params).unwrap_or_else(|_| String::from("none"))
    }
}

/// An admitted action request, ready for the request processor.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    request_id: String,
    requester: String,
    expires: String,
    request: ActionRequest,
    debug: Vec<Value>,
}

impl ParsedRequest {
    /// Builds a parsed request from a schema-validated envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnexpectedSchema`] when the envelope does
    /// not carry the cnc schema, [`ValidationError::Data`] when the data
    /// chunk fails cnc validation, and [`ValidationError::Deserialize`] when
    /// the validated chunk cannot be typed.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ValidationError> {
        if envelope.data_schema() != CNC_SCHEMA_URI {
            return Err(ValidationError::UnexpectedSchema {
                schema: envelope.data_schema().to_string(),
            });
        }
        schema::validate_cnc_data(envelope.data())?;
        let request: ActionRequest = serde_json::from_value(envelope.data().clone())
            .map_err(|source| ValidationError::Deserialize { source })?;
        Ok(Self {
            request_id: envelope.id().to_string(),
            requester: envelope.sender().to_string(),
            expires: envelope.expires().to_string(),
            request,
            debug: envelope.debug().to_vec(),
        })
    }

    /// Returns the fabric-assigned request id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        self.request_id.as_str()
    }

    /// Returns the requester URI (reply target).
    #[must_use]
    pub fn requester(&self) -> &str {
        self.requester.as_str()
    }

    /// Returns the request expiry stamp.
    #[must_use]
    pub fn expires(&self) -> &str {
        self.expires.as_str()
    }

    /// Returns the typed action request.
    #[must_use]
    pub const fn request(&self) -> &ActionRequest {
        &self.request
    }

    /// Returns the debug chunks carried alongside the request.
    #[must_use]
    pub fn debug(&self) -> &[Value] {
        &self.debug
    }
}
