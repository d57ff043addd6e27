//! Envelope model and wire schemas for the heddle message fabric.
//!
//! Every frame exchanged with the broker is a JSON envelope carrying routing
//! metadata around a schema-identified payload. This crate owns the envelope
//! representation, the well-known `data_schema` URIs, the JSON Schema
//! validators applied to inbound frames, and the [`ParsedRequest`] shape the
//! request processor consumes.
//!
//! Validation happens in two stages: the raw JSON value is checked against
//! the envelope schema (and, for action requests, the cnc data schema), then
//! deserialised into typed structs. Self-generated envelopes are validated
//! with the same schemas before transmission; a failure there indicates a
//! programming error and is treated as fatal by the caller.

pub mod envelope;
pub mod error;
pub mod request;
pub mod schema;

pub use self::envelope::{Envelope, EnvelopeHeader};
pub use self::error::ValidationError;
pub use self::request::{ActionRequest, ParsedRequest};
pub use self::schema::{
    BLOCKING_RESPONSE_URI, CNC_SCHEMA_URI, ENVELOPE_VERSION, LOGIN_SCHEMA_URI, MessageType,
    NON_BLOCKING_RESPONSE_URI, PROVISIONAL_RESPONSE_URI, RPC_ERROR_URI, validate_cnc_data,
    validate_envelope,
};
