//! The `echo` module: returns the supplied message unchanged.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::ModuleError;
use crate::module::{InternalAction, ModuleDescriptor};

/// Handler for `echo run`.
pub struct Echo;

impl InternalAction for Echo {
    fn call(&self, params: &Value) -> Result<Value, ModuleError> {
        let message = params
            .get("message")
            .ok_or_else(|| ModuleError::InvalidParams {
                module: String::from("echo"),
                action: String::from("run"),
                message: String::from("missing required parameter 'message'"),
            })?;
        Ok(json!({ "outcome": message }))
    }
}

/// Descriptor for the `echo` module.
#[must_use]
pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new("echo").with_internal("run", Arc::new(Echo))
}
