//! Agent bootstrap and the top-level run loop.
//!
//! Bootstrapping initialises telemetry, opens the spool root (failure is
//! fatal), and populates the module registry — built-ins first, then the
//! plugins directory scan. The resulting [`Agent`] wires the processor,
//! dispatcher, and connection supervisor together and runs the session
//! until shutdown or a fatal error.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tracing::{info, warn};

use heddle_config::Config;
use heddle_modules::ModuleRegistry;

use crate::dispatch::InboundDispatcher;
use crate::errors::FatalError;
use crate::processor::RequestProcessor;
use crate::reply::ReplySender;
use crate::spool::SpoolStore;
use crate::supervisor::{Channel, ConnectionSupervisor, LivenessMonitor};
use crate::telemetry;

/// Tracing target for bootstrap events.
const BOOTSTRAP_TARGET: &str = "heddled::bootstrap";

/// Grace period granted to running jobs at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// A bootstrapped agent, ready to run.
pub struct Agent {
    config: Config,
    registry: Arc<ModuleRegistry>,
    spool: SpoolStore,
}

/// Initialises telemetry, the spool, and the module registry.
///
/// # Errors
///
/// Returns a [`FatalError`] when telemetry cannot be installed or the
/// spool root cannot be created.
pub fn bootstrap(config: Config) -> Result<Agent, FatalError> {
    telemetry::initialise(&config).map_err(|source| FatalError::Telemetry { source })?;

    let spool_root = config.spool_dir.as_std_path();
    let spool = SpoolStore::open(spool_root).map_err(|source| FatalError::SpoolSetup {
        path: spool_root.to_path_buf(),
        source,
    })?;
    info!(
        target: BOOTSTRAP_TARGET,
        spool = %config.spool_dir,
        "spool ready"
    );

    let registry = build_registry(&config);
    Ok(Agent {
        config,
        registry: Arc::new(registry),
        spool,
    })
}

/// Populates the registry with built-ins and the plugins-directory scan,
/// logging what was loaded.
#[must_use]
pub fn build_registry(config: &Config) -> ModuleRegistry {
    let mut registry = ModuleRegistry::with_builtins();
    registry.scan_plugins(config.plugins_dir.as_std_path());

    info!(target: BOOTSTRAP_TARGET, modules = registry.len(), "loaded modules:");
    for descriptor in registry.descriptors() {
        info!(
            target: BOOTSTRAP_TARGET,
            module = descriptor.module_name(),
            actions = descriptor.action_names().join(", "),
            "  module"
        );
    }
    registry
}

impl Agent {
    /// Returns the populated module registry.
    #[must_use]
    pub fn registry(&self) -> Arc<ModuleRegistry> {
        Arc::clone(&self.registry)
    }

    /// Runs the broker session until shutdown or a fatal error, then
    /// drains background jobs.
    ///
    /// # Errors
    ///
    /// Propagates any [`FatalError`] raised by the connection supervisor.
    pub fn run(self, shutdown: Arc<AtomicBool>) -> Result<(), FatalError> {
        let channel = Arc::new(Channel::new());
        let liveness = Arc::new(LivenessMonitor::new());
        let reply = Arc::new(ReplySender::new(
            Arc::clone(&channel),
            self.config.agent_uri.clone(),
        ));

        let processor = Arc::new(RequestProcessor::new(
            Arc::clone(&reply),
            self.spool.clone(),
            self.config.action_timeout(),
            self.config.msg_timeout_seconds,
        ));
        let dispatcher = InboundDispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&processor),
            Arc::clone(&reply),
            self.config.msg_timeout_seconds,
        );
        let supervisor = ConnectionSupervisor::new(
            self.config.clone(),
            Arc::clone(&channel),
            liveness,
            reply,
            shutdown,
        );

        let result = supervisor.run(&dispatcher);

        // Give in-flight jobs a bounded window to finish their spool
        // writes; whatever is left is abandoned with status=running.
        processor.shutdown(SHUTDOWN_GRACE);
        if let Err(error) = &result {
            warn!(
                target: BOOTSTRAP_TARGET,
                error = %error,
                "agent terminated on a fatal error"
            );
        }
        result
    }
}
