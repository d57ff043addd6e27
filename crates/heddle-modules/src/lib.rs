//! Module registry and execution for the heddle agent.
//!
//! A *module* is a named provider of *actions*. Built-in modules run inside
//! the agent process; external modules are executable plugins discovered on
//! disk that communicate over a JSON stdin/stdout contract. Both are invoked
//! through the uniform [`ModuleDescriptor::execute`] entry point, which
//! yields an [`ActionOutcome`] or a request-level [`ModuleError`].
//!
//! External plugins declare their identity through introspection: invoking
//! the executable with the `metadata` argument must print a single JSON
//! document naming the module and its actions (with per-action input and
//! output schemas). Action invocations pass the action name as the sole
//! argument and the parameters as one JSON document on stdin.

pub mod builtin;
pub mod error;
pub mod external;
pub mod module;
pub mod outcome;
pub mod registry;

pub use self::error::ModuleError;
pub use self::external::{ActionSchemas, PluginMetadata};
pub use self::module::{ActionHandler, ExternalAction, InternalAction, ModuleDescriptor};
pub use self::outcome::ActionOutcome;
pub use self::registry::ModuleRegistry;
