//! The outer JSON structure carried on every fabric frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::ENVELOPE_VERSION;

/// Routing metadata shared by every self-generated envelope.
///
/// Bundles the fields a sender must supply; the remaining envelope fields
/// (`version`, `hops`, `debug`) take their protocol defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    id: String,
    sender: String,
    expires: String,
    endpoints: Vec<String>,
}

impl EnvelopeHeader {
    /// Creates a header for an outbound envelope.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        expires: impl Into<String>,
        endpoints: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            expires: expires.into(),
            endpoints,
        }
    }
}

/// A fabric envelope: routing metadata around a schema-identified payload.
///
/// Inbound envelopes are produced by deserialising a schema-validated JSON
/// value; outbound envelopes are built with [`Envelope::new`] and always
/// carry the current protocol version and an empty hops list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    id: String,
    version: String,
    expires: String,
    sender: String,
    endpoints: Vec<String>,
    hops: Vec<Value>,
    data_schema: String,
    data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    debug: Vec<Value>,
}

impl Envelope {
    /// Builds an outbound envelope with no debug chunks.
    #[must_use]
    pub fn new(header: EnvelopeHeader, data_schema: impl Into<String>, data: Value) -> Self {
        Self {
            id: header.id,
            version: ENVELOPE_VERSION.to_string(),
            expires: header.expires,
            sender: header.sender,
            endpoints: header.endpoints,
            hops: Vec::new(),
            data_schema: data_schema.into(),
            data,
            debug: Vec::new(),
        }
    }

    /// Attaches debug chunks, forwarded verbatim.
    #[must_use]
    pub fn with_debug(mut self, debug: Vec<Value>) -> Self {
        self.debug = debug;
        self
    }

    /// Returns the envelope id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Returns the protocol version string.
    #[must_use]
    pub fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Returns the expiry stamp (ISO-8601).
    #[must_use]
    pub fn expires(&self) -> &str {
        self.expires.as_str()
    }

    /// Returns the sender URI.
    #[must_use]
    pub fn sender(&self) -> &str {
        self.sender.as_str()
    }

    /// Returns the target endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Returns the payload schema URI.
    #[must_use]
    pub fn data_schema(&self) -> &str {
        self.data_schema.as_str()
    }

    /// Returns the payload.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Returns the attached debug chunks.
    #[must_use]
    pub fn debug(&self) -> &[Value] {
        &self.debug
    }
}
