//! External module invocation over the plugin stdin/stdout contract.
//!
//! A plugin is launched with the action name as its sole argument. The
//! parameters are written to its stdin as one JSON document followed by a
//! newline, then stdin is closed. Stdout and stderr are drained on
//! dedicated threads so arbitrarily large output cannot stall the child on
//! a full pipe. A per-action timeout bounds execution: on expiry the child
//! is asked to terminate, waited on briefly, then killed.
//!
//! Introspection uses the same machinery with the well-known `metadata`
//! argument and no input document; the plugin must print its
//! [`PluginMetadata`] declaration on stdout.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ModuleError;
use crate::outcome::ActionOutcome;

/// Tracing target for plugin process operations.
const EXTERNAL_TARGET: &str = "heddle_modules::external";

/// Argument that requests a plugin's metadata declaration.
pub const METADATA_ACTION: &str = "metadata";

/// Upper bound on the stderr tail quoted in error messages.
const STDERR_TAIL_BYTES: usize = 4 * 1024;

/// Interval between exit-status polls.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a timed-out child is given to terminate before being killed.
const TERMINATION_GRACE: Duration = Duration::from_millis(500);

/// Timeout applied to introspection calls.
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Declaration a plugin prints in response to the `metadata` argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginMetadata {
    module_name: String,
    actions: HashMap<String, ActionSchemas>,
}

impl PluginMetadata {
    /// Creates a metadata declaration.
    #[must_use]
    pub fn new(module_name: impl Into<String>, actions: HashMap<String, ActionSchemas>) -> Self {
        Self {
            module_name: module_name.into(),
            actions,
        }
    }

    /// Returns the declared module name.
    #[must_use]
    pub fn module_name(&self) -> &str {
        self.module_name.as_str()
    }

    /// Returns the declared actions.
    #[must_use]
    pub const fn actions(&self) -> &HashMap<String, ActionSchemas> {
        &self.actions
    }

    /// Decomposes the declaration into its parts.
    #[must_use]
    pub fn into_parts(self) -> (String, HashMap<String, ActionSchemas>) {
        (self.module_name, self.actions)
    }

    fn validate(&self, path: &Path) -> Result<(), ModuleError> {
        if self.module_name.trim().is_empty() {
            return Err(ModuleError::Metadata {
                path: path.to_path_buf(),
                message: String::from("declared module name is empty"),
            });
        }
        if self.actions.keys().any(|name| name.trim().is_empty()) {
            return Err(ModuleError::Metadata {
                path: path.to_path_buf(),
                message: String::from("declared action name is empty"),
            });
        }
        Ok(())
    }
}

/// Input and output schemas a plugin declares for one action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionSchemas {
    #[serde(default)]
    input_schema: Value,
    #[serde(default)]
    output_schema: Value,
}

impl ActionSchemas {
    /// Creates a schema pair.
    #[must_use]
    pub const fn new(input_schema: Value, output_schema: Value) -> Self {
        Self {
            input_schema,
            output_schema,
        }
    }

    /// Decomposes the pair into `(input_schema, output_schema)`.
    #[must_use]
    pub fn into_parts(self) -> (Value, Value) {
        (self.input_schema, self.output_schema)
    }
}

/// Runs a plugin action and interprets the exit-code contract.
///
/// # Errors
///
/// Returns [`ModuleError::NonZeroExit`] when the plugin exits non-zero
/// (quoting up to 4 KiB of its stderr), [`ModuleError::NonJsonOutput`] when
/// a successful exit leaves unparseable stdout, [`ModuleError::Timeout`]
/// when the per-action timeout expires, and spawn or I/O errors otherwise.
pub fn invoke(
    module: &str,
    executable: &Path,
    action: &str,
    params: &Value,
    timeout: Duration,
) -> Result<ActionOutcome, ModuleError> {
    let capture = run_plugin(module, executable, action, Some(params), timeout)?;

    if !capture.status.success() {
        let code = capture.status.code().unwrap_or(-1);
        return Err(ModuleError::NonZeroExit {
            module: module.to_string(),
            code,
            stderr_tail: stderr_tail(&capture.stderr),
        });
    }

    let results =
        serde_json::from_slice(&capture.stdout).map_err(|_| ModuleError::NonJsonOutput {
            module: module.to_string(),
        })?;

    Ok(ActionOutcome::External {
        stdout: capture.stdout,
        stderr: capture.stderr,
        exit_code: 0,
        results,
    })
}

/// Introspects a plugin executable and returns its validated declaration.
///
/// # Errors
///
/// Returns [`ModuleError::Metadata`] when the plugin exits non-zero,
/// prints an unparseable declaration, or declares empty names; spawn and
/// I/O errors pass through unchanged.
pub fn introspect(executable: &Path) -> Result<PluginMetadata, ModuleError> {
    let label = executable.to_string_lossy().to_string();
    let capture = run_plugin(&label, executable, METADATA_ACTION, None, METADATA_TIMEOUT)?;

    if !capture.status.success() {
        return Err(ModuleError::Metadata {
            path: executable.to_path_buf(),
            message: format!(
                "metadata call exited with code {}: {}",
                capture.status.code().unwrap_or(-1),
                stderr_tail(&capture.stderr)
            ),
        });
    }

    let metadata: PluginMetadata =
        serde_json::from_slice(&capture.stdout).map_err(|error| ModuleError::Metadata {
            path: executable.to_path_buf(),
            message: format!("metadata is not a valid declaration: {error}"),
        })?;
    metadata.validate(executable)?;
    Ok(metadata)
}

struct Capture {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn run_plugin(
    module: &str,
    executable: &Path,
    action: &str,
    params: Option<&Value>,
    timeout: Duration,
) -> Result<Capture, ModuleError> {
    debug!(
        target: EXTERNAL_TARGET,
        module,
        action,
        executable = %executable.display(),
        "spawning plugin process"
    );

    let mut child = Command::new(executable)
        .arg(action)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ModuleError::Spawn {
            path: executable.to_path_buf(),
            source,
        })?;

    let stdout = take_pipe(module, child.stdout.take())?;
    let stderr = take_pipe(module, child.stderr.take())?;
    let stdout_reader = drain_pipe(stdout);
    let stderr_reader = drain_pipe(stderr);

    let stdin = child.stdin.take();
    if let Some(params) = params {
        let Some(stdin) = stdin else {
            return Err(ModuleError::Io {
                module: module.to_string(),
                source: io::Error::other("failed to capture plugin stdin"),
            });
        };
        write_params(module, stdin, params)?;
    } else {
        // Close stdin immediately so the plugin sees EOF.
        drop(stdin);
    }

    let status = wait_with_deadline(module, &mut child, timeout)?;
    let stdout = join_reader(module, stdout_reader)?;
    let stderr = join_reader(module, stderr_reader)?;

    debug!(
        target: EXTERNAL_TARGET,
        module,
        action,
        ?status,
        stdout_bytes = stdout.len(),
        stderr_bytes = stderr.len(),
        "plugin process finished"
    );

    Ok(Capture {
        status,
        stdout,
        stderr,
    })
}

fn take_pipe<P>(module: &str, pipe: Option<P>) -> Result<P, ModuleError> {
    pipe.ok_or_else(|| ModuleError::Io {
        module: module.to_string(),
        source: io::Error::other("failed to capture plugin output pipe"),
    })
}

/// Writes the serialised parameters to the plugin's stdin and closes it.
///
/// A broken pipe is tolerated: a plugin may legitimately exit without
/// reading its input.
fn write_params(module: &str, mut stdin: impl Write, params: &Value) -> Result<(), ModuleError> {
    let mut document = serde_json::to_vec(params).map_err(|error| ModuleError::Io {
        module: module.to_string(),
        source: io::Error::other(error),
    })?;
    document.push(b'\n');

    match stdin.write_all(&document).and_then(|()| stdin.flush()) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(source) => Err(ModuleError::Io {
            module: module.to_string(),
            source,
        }),
    }
}

fn drain_pipe(mut pipe: impl Read + Send + 'static) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        pipe.read_to_end(&mut buffer)?;
        Ok(buffer)
    })
}

fn join_reader(
    module: &str,
    reader: JoinHandle<io::Result<Vec<u8>>>,
) -> Result<Vec<u8>, ModuleError> {
    let joined = reader.join().map_err(|_| ModuleError::Io {
        module: module.to_string(),
        source: io::Error::other("plugin output reader panicked"),
    })?;
    joined.map_err(|source| ModuleError::Io {
        module: module.to_string(),
        source,
    })
}

/// Polls the child for exit, enforcing the timeout.
///
/// On expiry the child is asked to terminate, granted a short grace
/// period, then killed. The child is always waited on.
fn wait_with_deadline(
    module: &str,
    child: &mut Child,
    timeout: Duration,
) -> Result<ExitStatus, ModuleError> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if start.elapsed() > timeout {
                    warn!(
                        target: EXTERNAL_TARGET,
                        module,
                        timeout_secs = timeout.as_secs(),
                        "plugin timed out, terminating process"
                    );
                    terminate(module, child);
                    return Err(ModuleError::Timeout {
                        module: module.to_string(),
                        timeout_secs: timeout.as_secs(),
                    });
                }
                thread::sleep(EXIT_POLL_INTERVAL);
            }
            Err(source) => {
                return Err(ModuleError::Io {
                    module: module.to_string(),
                    source,
                });
            }
        }
    }
}

fn terminate(module: &str, child: &mut Child) {
    request_termination(child);

    let grace_start = Instant::now();
    while grace_start.elapsed() < TERMINATION_GRACE {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
            Err(error) => {
                warn!(
                    target: EXTERNAL_TARGET,
                    module,
                    error = %error,
                    "failed to poll terminating plugin"
                );
                break;
            }
        }
    }

    drop(child.kill());
    drop(child.wait());
}

#[cfg(unix)]
fn request_termination(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    drop(kill(Pid::from_raw(pid), Signal::SIGTERM));
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) {}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim_end().to_string()
}

#[cfg(test)]
pub(crate) mod tests;
