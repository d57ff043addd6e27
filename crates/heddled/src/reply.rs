//! Serialisation and transmission of self-generated envelopes.
//!
//! The [`ReplySender`] is the single path every outbound message takes:
//! it stamps the envelope metadata (fresh id, sender URI, expiry derived
//! from the message timeout), attaches debug chunks when present,
//! validates the result against the envelope schema, and hands the frame
//! to the transport. Self-generated messages must always validate; a
//! violation is a programming error surfaced as
//! [`SendError::InvalidEnvelope`].

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use heddle_proto::{Envelope, EnvelopeHeader, MessageType, ValidationError, validate_envelope};

/// Tracing target for outbound messaging.
const REPLY_TARGET: &str = "heddled::reply";

/// A transient failure while handing a frame to the channel.
///
/// Never retried: the broker is expected to redrive the request.
#[derive(Debug, Error)]
#[error("connection error: {message}")]
pub struct ConnectionError {
    message: String,
}

impl ConnectionError {
    /// Creates a connection error with the given description.
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

/// Abstraction over the outbound half of the broker channel.
///
/// The production implementation is the WebSocket
/// [`Channel`](crate::supervisor::Channel); tests substitute a recorder.
pub trait ReplyTransport: Send + Sync {
    /// Transmits one serialised envelope as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the channel rejects the send or is
    /// not open.
    fn send_frame(&self, frame: &str) -> Result<(), ConnectionError>;
}

/// Errors raised while sending a self-generated message.
#[derive(Debug, Error)]
pub enum SendError {
    /// The channel rejected the frame.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The envelope failed schema validation before transmission.
    #[error("self-generated envelope failed schema validation: {}", errors.join("; "))]
    InvalidEnvelope {
        /// Every violation reported by the validator.
        errors: Vec<String>,
    },
}

/// Serialises and transmits envelopes on behalf of the agent.
#[derive(Debug)]
pub struct ReplySender<T> {
    transport: Arc<T>,
    sender_uri: String,
}

impl<T: ReplyTransport> ReplySender<T> {
    /// Creates a sender stamping envelopes with the given sender URI.
    #[must_use]
    pub fn new(transport: Arc<T>, sender_uri: impl Into<String>) -> Self {
        Self {
            transport,
            sender_uri: sender_uri.into(),
        }
    }

    /// Builds, validates, and transmits one message.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::InvalidEnvelope`] when the assembled envelope
    /// fails schema validation (escalated by callers as fatal), or
    /// [`SendError::Connection`] when the channel rejects the frame.
    pub fn send(
        &self,
        targets: &[String],
        message_type: MessageType,
        timeout_secs: u64,
        payload: Value,
        debug_chunks: &[Value],
    ) -> Result<(), SendError> {
        let delta = chrono::Duration::seconds(clamp_secs(timeout_secs));
        let expires_at = Utc::now().checked_add_signed(delta).unwrap_or_else(Utc::now);
        let header = EnvelopeHeader::new(
            Uuid::new_v4().to_string(),
            &self.sender_uri,
            expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            targets.to_vec(),
        );
        let mut envelope = Envelope::new(header, message_type.uri(), payload);
        if !debug_chunks.is_empty() {
            envelope = envelope.with_debug(debug_chunks.to_vec());
        }

        let value = serde_json::to_value(&envelope).map_err(|error| SendError::InvalidEnvelope {
            errors: vec![error.to_string()],
        })?;
        validate_envelope(&value).map_err(|error| match error {
            ValidationError::Envelope { errors } => SendError::InvalidEnvelope { errors },
            other => SendError::InvalidEnvelope {
                errors: vec![other.to_string()],
            },
        })?;

        let frame = value.to_string();
        debug!(
            target: REPLY_TARGET,
            schema = message_type.uri(),
            bytes = frame.len(),
            "sending message"
        );
        self.transport.send_frame(&frame)?;
        Ok(())
    }
}

/// Bounds the expiry delta to one year so the datetime arithmetic cannot
/// overflow.
fn clamp_secs(secs: u64) -> i64 {
    const ONE_YEAR_SECS: u64 = 31_536_000;
    i64::try_from(secs.min(ONE_YEAR_SECS)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tests::support::RecordingTransport;

    #[test]
    fn stamps_envelope_metadata_and_validates() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = ReplySender::new(Arc::clone(&transport), "cth://host-1/agent");

        sender
            .send(
                &[String::from("cth://controller/server")],
                MessageType::BlockingResponse,
                10,
                json!({"transaction_id": "t1", "results": {"outcome": "hi"}}),
                &[],
            )
            .expect("send should succeed");

        let frames = transport.frames();
        assert_eq!(frames.len(), 1);
        let value: Value = serde_json::from_str(&frames[0]).expect("frame is JSON");
        assert_eq!(value["version"], "1");
        assert_eq!(value["sender"], "cth://host-1/agent");
        assert_eq!(value["endpoints"], json!(["cth://controller/server"]));
        assert_eq!(
            value["data_schema"],
            "http://puppetlabs.com/rpc_blocking_response"
        );
        assert!(value.get("debug").is_none());
        validate_envelope(&value).expect("self-generated envelope validates");
    }

    #[test]
    fn attaches_debug_chunks_verbatim() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = ReplySender::new(Arc::clone(&transport), "cth://host-1/agent");

        sender
            .send(
                &[String::from("cth://controller/server")],
                MessageType::ProvisionalResponse,
                10,
                json!({"transaction_id": "t1", "success": true, "job_id": "j1"}),
                &[json!({"hop": "broker-1"})],
            )
            .expect("send should succeed");

        let value: Value =
            serde_json::from_str(&transport.frames()[0]).expect("frame is JSON");
        assert_eq!(value["debug"], json!([{"hop": "broker-1"}]));
    }

    #[test]
    fn distinct_sends_draw_distinct_envelope_ids() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = ReplySender::new(Arc::clone(&transport), "cth://host-1/agent");
        for _ in 0..2 {
            sender
                .send(
                    &[String::from("cth://controller/server")],
                    MessageType::RpcError,
                    10,
                    json!({"transaction_id": "t", "id": "r", "description": "x"}),
                    &[],
                )
                .expect("send should succeed");
        }
        let frames = transport.frames();
        let first: Value = serde_json::from_str(&frames[0]).expect("frame is JSON");
        let second: Value = serde_json::from_str(&frames[1]).expect("frame is JSON");
        assert_ne!(first["id"], second["id"]);
    }

    #[test]
    fn transport_failure_maps_to_connection_error() {
        let transport = Arc::new(RecordingTransport::rejecting("broken pipe"));
        let sender = ReplySender::new(Arc::clone(&transport), "cth://host-1/agent");
        let error = sender
            .send(
                &[String::from("cth://controller/server")],
                MessageType::RpcError,
                10,
                json!({"transaction_id": "t", "id": "r", "description": "x"}),
                &[],
            )
            .expect_err("send should fail");
        assert!(matches!(error, SendError::Connection(_)));
    }
}
