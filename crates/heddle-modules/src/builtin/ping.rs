//! The `ping` module: confirms the agent is alive and responsive.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::ModuleError;
use crate::module::{InternalAction, ModuleDescriptor};

/// Handler for `ping run`.
///
/// Echoes back an optional `sender_timestamp` so the requester can measure
/// the fabric round trip.
pub struct Ping;

impl InternalAction for Ping {
    fn call(&self, params: &Value) -> Result<Value, ModuleError> {
        let mut results = json!({ "outcome": "pong" });
        if let Some(timestamp) = params.get("sender_timestamp") {
            results["sender_timestamp"] = timestamp.clone();
        }
        Ok(results)
    }
}

/// Descriptor for the `ping` module.
#[must_use]
pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new("ping").with_internal("run", Arc::new(Ping))
}
