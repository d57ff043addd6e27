//! The module registry: built-ins plus plugins discovered on disk.
//!
//! The registry is populated once at startup and is immutable thereafter,
//! so lookups need no locking. Built-ins are registered first; the plugins
//! directory is then scanned non-recursively, and every regular file is
//! introspected as a candidate external module. A plugin that fails
//! introspection (or violates a registry invariant) is logged and skipped;
//! it never prevents startup.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::builtin;
use crate::error::ModuleError;
use crate::module::ModuleDescriptor;

/// Tracing target for registry population.
const REGISTRY_TARGET: &str = "heddle_modules::registry";

/// Mapping from module name to descriptor; lookup is exact and
/// case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: std::collections::HashMap<String, ModuleDescriptor>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry populated with the agent's built-in modules.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for descriptor in builtin::all() {
            let name = descriptor.module_name().to_string();
            if let Err(error) = registry.register(descriptor) {
                // Built-in descriptors are statically well-formed, so this
                // only fires on a duplicate introduced by a refactor.
                warn!(
                    target: REGISTRY_TARGET,
                    module = name.as_str(),
                    error = %error,
                    "skipping built-in module"
                );
            }
        }
        registry
    }

    /// Registers a module descriptor after validation.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Registration`] when validation fails or a
    /// module with the same name is already registered.
    pub fn register(&mut self, descriptor: ModuleDescriptor) -> Result<(), ModuleError> {
        descriptor.validate()?;
        let name = descriptor.module_name().to_string();
        if self.modules.contains_key(&name) {
            return Err(ModuleError::Registration {
                message: format!("module '{name}' is already registered"),
            });
        }
        self.modules.insert(name, descriptor);
        Ok(())
    }

    /// Scans a directory for external module plugins and registers each
    /// candidate that introspects cleanly.
    pub fn scan_plugins(&mut self, dir: &Path) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(
                    target: REGISTRY_TARGET,
                    dir = %dir.display(),
                    error = %error,
                    "plugins directory is not readable, skipping scan"
                );
                return;
            }
        };

        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(error) => {
                    warn!(
                        target: REGISTRY_TARGET,
                        dir = %dir.display(),
                        error = %error,
                        "failed to read plugins directory entry"
                    );
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            self.load_plugin(&path);
        }
    }

    fn load_plugin(&mut self, path: &Path) {
        let metadata = match crate::external::introspect(path) {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!(
                    target: REGISTRY_TARGET,
                    path = %path.display(),
                    error = %error,
                    "skipping plugin that failed introspection"
                );
                return;
            }
        };

        let descriptor = ModuleDescriptor::from_plugin(metadata, path.to_path_buf());
        let name = descriptor.module_name().to_string();
        match self.register(descriptor) {
            Ok(()) => {
                info!(
                    target: REGISTRY_TARGET,
                    module = name.as_str(),
                    path = %path.display(),
                    "loaded external module"
                );
            }
            Err(error) => {
                warn!(
                    target: REGISTRY_TARGET,
                    path = %path.display(),
                    error = %error,
                    "skipping plugin that failed registration"
                );
            }
        }
    }

    /// Looks up a module by name (exact, case-sensitive).
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(name)
    }

    /// Returns the registered descriptors, sorted by module name.
    #[must_use]
    pub fn descriptors(&self) -> Vec<&ModuleDescriptor> {
        let mut descriptors: Vec<&ModuleDescriptor> = self.modules.values().collect();
        descriptors.sort_unstable_by_key(|descriptor| descriptor.module_name());
        descriptors
    }

    /// Returns the number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` when no modules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
