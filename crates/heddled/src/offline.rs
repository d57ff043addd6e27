//! Offline execution: run one module action without a broker.
//!
//! `heddled run <module> <action>` reads a single-line JSON params
//! document from stdin (an empty line means no parameters), executes the
//! action through the regular registry, and prints the outcome's results
//! as one JSON line on stdout.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use heddle_modules::{ModuleError, ModuleRegistry};

/// Errors raised by the offline runner.
#[derive(Debug, Error)]
pub enum OfflineError {
    /// Parameters could not be read from stdin.
    #[error("failed to read parameters from stdin: {source}")]
    Stdin {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The input line is not a JSON document.
    #[error("parameters are not valid JSON: {source}")]
    Params {
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The module or action rejected the request.
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// The results could not be written.
    #[error("failed to write results: {source}")]
    Output {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Executes one action and writes its results as a JSON line.
///
/// # Errors
///
/// Returns an [`OfflineError`] naming the failed step; module failures
/// pass through as [`OfflineError::Module`].
pub fn run_action(
    registry: &ModuleRegistry,
    module_name: &str,
    action: &str,
    timeout: Duration,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<(), OfflineError> {
    let mut line = String::new();
    input
        .read_line(&mut line)
        .map_err(|source| OfflineError::Stdin { source })?;

    let params: Value = if line.trim().is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(line.trim()).map_err(|source| OfflineError::Params { source })?
    };

    let module = registry
        .lookup(module_name)
        .ok_or_else(|| ModuleError::UnknownModule {
            name: module_name.to_string(),
        })?;
    let outcome = module.execute(action, &params, timeout)?;

    serde_json::to_writer(&mut *output, outcome.results()).map_err(|error| {
        OfflineError::Output {
            source: io::Error::other(error),
        }
    })?;
    output
        .write_all(b"\n")
        .map_err(|source| OfflineError::Output { source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(module: &str, action: &str, input: &str) -> Result<String, OfflineError> {
        let registry = ModuleRegistry::with_builtins();
        let mut output = Vec::new();
        run_action(
            &registry,
            module,
            action,
            Duration::from_secs(5),
            &mut input.as_bytes(),
            &mut output,
        )?;
        Ok(String::from_utf8(output).expect("output should be UTF-8"))
    }

    #[test]
    fn runs_echo_from_a_params_line() {
        let output = run("echo", "run", "{\"message\": \"hi\"}\n").expect("echo should run");
        assert_eq!(output, "{\"outcome\":\"hi\"}\n");
    }

    #[test]
    fn empty_input_means_no_parameters() {
        let output = run("ping", "run", "\n").expect("ping should run");
        assert!(output.contains("pong"));
    }

    #[test]
    fn unknown_module_is_reported() {
        let error = run("nope", "run", "{}\n").expect_err("module should be unknown");
        assert!(matches!(
            error,
            OfflineError::Module(ModuleError::UnknownModule { .. })
        ));
    }

    #[test]
    fn malformed_params_are_reported() {
        let error = run("echo", "run", "{not json\n").expect_err("params should be rejected");
        assert!(matches!(error, OfflineError::Params { .. }));
    }
}
