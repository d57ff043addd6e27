//! Admission and routing of inbound fabric frames.
//!
//! Each text frame is parsed as JSON, validated against the envelope
//! schema, checked for the cnc data schema, and validated again at the
//! data-chunk level before the processor is invoked. A frame failing any
//! of those steps is logged and dropped without a reply — the sender may
//! not be known at that point.
//!
//! A well-formed request naming an unknown module is answered with an
//! `rpc_error`, as is a blocking request whose execution fails.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error, warn};

use heddle_modules::{ModuleError, ModuleRegistry};
use heddle_proto::{CNC_SCHEMA_URI, Envelope, MessageType, ParsedRequest, validate_envelope};

use crate::processor::RequestProcessor;
use crate::reply::{ReplySender, ReplyTransport};

/// Tracing target for inbound dispatch.
const DISPATCH_TARGET: &str = "heddled::dispatch";

/// Routes validated requests from the channel to the processor.
pub struct InboundDispatcher<T> {
    registry: Arc<ModuleRegistry>,
    processor: Arc<RequestProcessor<T>>,
    reply: Arc<ReplySender<T>>,
    msg_timeout_secs: u64,
}

impl<T: ReplyTransport + 'static> InboundDispatcher<T> {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        registry: Arc<ModuleRegistry>,
        processor: Arc<RequestProcessor<T>>,
        reply: Arc<ReplySender<T>>,
        msg_timeout_secs: u64,
    ) -> Self {
        Self {
            registry,
            processor,
            reply,
            msg_timeout_secs,
        }
    }

    /// Admits one inbound text frame.
    pub fn handle_frame(&self, frame: &str) {
        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(parse_error) => {
                error!(
                    target: DISPATCH_TARGET,
                    error = %parse_error,
                    "dropping frame that is not valid JSON"
                );
                return;
            }
        };

        if let Err(validation_error) = validate_envelope(&value) {
            error!(
                target: DISPATCH_TARGET,
                error = %validation_error,
                "dropping frame that failed envelope validation"
            );
            return;
        }

        let envelope: Envelope = match serde_json::from_value(value) {
            Ok(envelope) => envelope,
            Err(parse_error) => {
                error!(
                    target: DISPATCH_TARGET,
                    error = %parse_error,
                    "dropping envelope that failed typed deserialisation"
                );
                return;
            }
        };

        if envelope.data_schema() != CNC_SCHEMA_URI {
            debug!(
                target: DISPATCH_TARGET,
                schema = envelope.data_schema(),
                "ignoring frame that is not an action request"
            );
            return;
        }

        let parsed = match ParsedRequest::from_envelope(&envelope) {
            Ok(parsed) => parsed,
            Err(validation_error) => {
                error!(
                    target: DISPATCH_TARGET,
                    request_id = envelope.id(),
                    error = %validation_error,
                    "dropping action request that failed data validation"
                );
                return;
            }
        };

        self.process(&parsed);
    }

    fn process(&self, parsed: &ParsedRequest) {
        let module_name = parsed.request().module();
        let action = parsed.request().action().to_string();

        let Some(module) = self.registry.lookup(module_name) else {
            warn!(
                target: DISPATCH_TARGET,
                request_id = parsed.request_id(),
                module = module_name,
                "request names an unknown module"
            );
            self.send_rpc_error(
                parsed,
                &ModuleError::UnknownModule {
                    name: module_name.to_string(),
                },
            );
            return;
        };

        if parsed.request().is_non_blocking() {
            self.processor.process_non_blocking(module, &action, parsed);
        } else if let Err(module_error) =
            self.processor.process_blocking(module, &action, parsed)
        {
            warn!(
                target: DISPATCH_TARGET,
                request_id = parsed.request_id(),
                module = module_name,
                action = action.as_str(),
                error = %module_error,
                "blocking request failed"
            );
            self.send_rpc_error(parsed, &module_error);
        }
    }

    fn send_rpc_error(&self, parsed: &ParsedRequest, module_error: &ModuleError) {
        let payload = json!({
            "transaction_id": parsed.request().transaction_id(),
            "id": parsed.request_id(),
            "description": module_error.to_string(),
        });
        if let Err(send_error) = self.reply.send(
            &[parsed.requester().to_string()],
            MessageType::RpcError,
            self.msg_timeout_secs,
            payload,
            &[],
        ) {
            error!(
                target: DISPATCH_TARGET,
                request_id = parsed.request_id(),
                requester = parsed.requester(),
                error = %send_error,
                "failed to send RPC error (no further attempts)"
            );
        }
    }
}

#[cfg(test)]
mod tests;
