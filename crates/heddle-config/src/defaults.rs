use camino::Utf8PathBuf;
use std::env;

/// Default broker endpoint the agent dials when none is configured.
pub const DEFAULT_BROKER_URL: &str = "wss://localhost:8142/fabric";

/// Default sender URI stamped on self-generated envelopes.
pub const DEFAULT_AGENT_URI: &str = "cth://localhost/agent";

/// Default heartbeat period in seconds.
pub const DEFAULT_HEARTBEAT_PERIOD_SECS: u64 = 30;

/// Default per-action timeout for external modules, in seconds.
pub const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 30;

/// Default timeout carried on outbound messages, in seconds.
pub const DEFAULT_MSG_TIMEOUT_SECS: u64 = 10;

/// Default initial reconnect backoff in seconds.
pub const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 2;

/// Default cap for the reconnect backoff in seconds.
pub const DEFAULT_RECONNECT_BACKOFF_CAP_SECS: u64 = 30;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Computes the default spool root for job state and captured streams.
///
/// Prefers the per-user local data directory and falls back to a
/// namespaced path under the system temporary directory.
pub fn default_spool_dir() -> Utf8PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(env::temp_dir);
    let candidate = base.join("heddle").join("spool");
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp/heddle/spool"))
}

/// Computes the default plugins directory scanned at startup.
pub fn default_plugins_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("modules")
}
