//! The `inventory` module: reports static facts about the agent host.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::ModuleError;
use crate::module::{InternalAction, ModuleDescriptor};

/// Handler for `inventory run`.
pub struct Inventory;

impl InternalAction for Inventory {
    fn call(&self, _params: &Value) -> Result<Value, ModuleError> {
        Ok(json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "agent_version": env!("CARGO_PKG_VERSION"),
        }))
    }
}

/// Descriptor for the `inventory` module.
#[must_use]
pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new("inventory").with_internal("run", Arc::new(Inventory))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[test]
    fn reports_host_facts() {
        let outcome = descriptor()
            .execute("run", &json!({}), Duration::from_secs(1))
            .expect("inventory should run");
        let results = outcome.results();
        assert_eq!(results["os"], std::env::consts::OS);
        assert_eq!(results["arch"], std::env::consts::ARCH);
        assert!(results["agent_version"].is_string());
    }
}
