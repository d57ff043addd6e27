//! Module descriptors and the uniform action execution contract.
//!
//! A [`ModuleDescriptor`] maps action names to [`ActionHandler`] variants.
//! Handlers are either *internal* (a function over structured input) or
//! *external* (a reference to a plugin executable plus per-action schemas).
//! The handler is selected at lookup and invoked through
//! [`ModuleDescriptor::execute`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::ModuleError;
use crate::external::{self, PluginMetadata};
use crate::outcome::ActionOutcome;

/// A built-in action: a pure function over structured input.
pub trait InternalAction: Send + Sync {
    /// Executes the action with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns a [`ModuleError`] when the parameters are rejected or the
    /// handler fails.
    fn call(&self, params: &Value) -> Result<Value, ModuleError>;
}

/// Reference to an external plugin action.
#[derive(Debug, Clone)]
pub struct ExternalAction {
    executable: PathBuf,
    input_schema: Value,
    output_schema: Value,
}

impl ExternalAction {
    /// Creates an external action backed by the given executable.
    #[must_use]
    pub fn new(executable: PathBuf, input_schema: Value, output_schema: Value) -> Self {
        Self {
            executable,
            input_schema,
            output_schema,
        }
    }

    /// Returns the plugin executable path.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Returns the declared input schema for the action.
    #[must_use]
    pub const fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Returns the declared output schema for the action.
    #[must_use]
    pub const fn output_schema(&self) -> &Value {
        &self.output_schema
    }
}

/// Handler bound to one action name.
#[derive(Clone)]
pub enum ActionHandler {
    /// Built-in handler running inside the agent process.
    Internal(Arc<dyn InternalAction>),
    /// Plugin executable invoked as a child process.
    External(ExternalAction),
}

impl fmt::Debug for ActionHandler {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(_) => formatter.write_str("ActionHandler::Internal"),
            Self::External(action) => formatter
                .debug_tuple("ActionHandler::External")
                .field(action)
                .finish(),
        }
    }
}

/// A named provider of actions.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    module_name: String,
    actions: HashMap<String, ActionHandler>,
}

impl ModuleDescriptor {
    /// Creates a descriptor with no actions.
    #[must_use]
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            actions: HashMap::new(),
        }
    }

    /// Builds a descriptor for an external plugin from its introspected
    /// metadata: every declared action is bound to the executable.
    #[must_use]
    pub fn from_plugin(metadata: PluginMetadata, executable: PathBuf) -> Self {
        let (module_name, actions) = metadata.into_parts();
        let actions = actions
            .into_iter()
            .map(|(name, schemas)| {
                let (input_schema, output_schema) = schemas.into_parts();
                (
                    name,
                    ActionHandler::External(ExternalAction::new(
                        executable.clone(),
                        input_schema,
                        output_schema,
                    )),
                )
            })
            .collect();
        Self {
            module_name,
            actions,
        }
    }

    /// Binds an internal handler to an action name.
    #[must_use]
    pub fn with_internal(
        mut self,
        action: impl Into<String>,
        handler: Arc<dyn InternalAction>,
    ) -> Self {
        self.actions
            .insert(action.into(), ActionHandler::Internal(handler));
        self
    }

    /// Validates the descriptor against the registry invariants: the module
    /// name and every action name must be non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Registration`] naming the violation.
    pub fn validate(&self) -> Result<(), ModuleError> {
        if self.module_name.trim().is_empty() {
            return Err(ModuleError::Registration {
                message: String::from("module name must not be empty"),
            });
        }
        if self.actions.keys().any(|name| name.trim().is_empty()) {
            return Err(ModuleError::Registration {
                message: format!(
                    "module '{}' declares an action with an empty name",
                    self.module_name
                ),
            });
        }
        Ok(())
    }

    /// Returns the module name.
    #[must_use]
    pub fn module_name(&self) -> &str {
        self.module_name.as_str()
    }

    /// Returns the action names, sorted for stable listings.
    #[must_use]
    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Looks up the handler bound to an action name (exact match).
    #[must_use]
    pub fn handler(&self, action: &str) -> Option<&ActionHandler> {
        self.actions.get(action)
    }

    /// Executes an action with the given parameters.
    ///
    /// The timeout bounds external plugin executions only; internal
    /// handlers run to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::UnknownAction`] when the action is not bound,
    /// or any execution error from the handler.
    pub fn execute(
        &self,
        action: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<ActionOutcome, ModuleError> {
        let handler = self
            .actions
            .get(action)
            .ok_or_else(|| ModuleError::UnknownAction {
                module: self.module_name.clone(),
                action: action.to_string(),
            })?;

        match handler {
            ActionHandler::Internal(handler) => {
                let results = handler.call(params)?;
                Ok(ActionOutcome::Internal { results })
            }
            ActionHandler::External(external) => external::invoke(
                &self.module_name,
                external.executable(),
                action,
                params,
                timeout,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Doubler;

    impl InternalAction for Doubler {
        fn call(&self, params: &Value) -> Result<Value, ModuleError> {
            let n = params
                .get("n")
                .and_then(Value::as_i64)
                .ok_or_else(|| ModuleError::InvalidParams {
                    module: String::from("math"),
                    action: String::from("double"),
                    message: String::from("missing integer parameter 'n'"),
                })?;
            Ok(json!({"n": n * 2}))
        }
    }

    #[test]
    fn executes_internal_handler() {
        let descriptor = ModuleDescriptor::new("math").with_internal("double", Arc::new(Doubler));
        let outcome = descriptor
            .execute("double", &json!({"n": 21}), Duration::from_secs(1))
            .expect("action should run");
        assert_eq!(outcome.results(), &json!({"n": 42}));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let descriptor = ModuleDescriptor::new("math").with_internal("double", Arc::new(Doubler));
        let error = descriptor
            .execute("halve", &json!({}), Duration::from_secs(1))
            .expect_err("unknown action");
        assert!(matches!(error, ModuleError::UnknownAction { .. }));
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let descriptor = ModuleDescriptor::new("math").with_internal("double", Arc::new(Doubler));
        assert!(descriptor.handler("double").is_some());
        assert!(descriptor.handler("Double").is_none());
    }

    #[test]
    fn empty_names_fail_validation() {
        let descriptor = ModuleDescriptor::new("  ");
        assert!(matches!(
            descriptor.validate(),
            Err(ModuleError::Registration { .. })
        ));

        let descriptor = ModuleDescriptor::new("math").with_internal("", Arc::new(Doubler));
        assert!(matches!(
            descriptor.validate(),
            Err(ModuleError::Registration { .. })
        ));
    }
}
