//! Configuration loading for the heddle agent.
//!
//! The agent reads its settings from layered sources, in ascending
//! precedence: built-in defaults, an optional TOML file, `HEDDLE_*`
//! environment variables, and explicit overrides supplied by the command
//! line. The resolved [`Config`] is immutable for the lifetime of the
//! process.
//!
//! Path values support a leading `~/` which is expanded against the user's
//! home directory at load time. The spool directory is normalised to end
//! with a path separator, as the spool layout requires.

use std::env;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub mod defaults;
pub mod logging;

pub use defaults::{
    DEFAULT_ACTION_TIMEOUT_SECS, DEFAULT_AGENT_URI, DEFAULT_BROKER_URL,
    DEFAULT_HEARTBEAT_PERIOD_SECS, DEFAULT_LOG_FILTER, DEFAULT_MSG_TIMEOUT_SECS,
    DEFAULT_RECONNECT_BACKOFF_CAP_SECS, DEFAULT_RECONNECT_BACKOFF_SECS, default_log_format,
    default_plugins_dir, default_spool_dir,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "HEDDLE_CONFIG";

const ENV_PREFIX: &str = "HEDDLE_";

/// Resolved agent configuration.
///
/// Fields are public so collaborators (and tests) can adjust a loaded or
/// default configuration directly; [`Config::load`] is the canonical
/// entry point for the binaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Spool root for per-job state; always ends with a path separator.
    pub spool_dir: Utf8PathBuf,
    /// Directory scanned (non-recursively) for external module plugins.
    pub plugins_dir: Utf8PathBuf,
    /// Broker endpoint; scheme must be `ws` or `wss`.
    pub broker_url: Url,
    /// CA certificate bundle for the broker channel.
    pub ca_crt: Option<Utf8PathBuf>,
    /// Client certificate presented to the broker.
    pub client_crt: Option<Utf8PathBuf>,
    /// Private key matching `client_crt`.
    pub client_key: Option<Utf8PathBuf>,
    /// Sender URI stamped on self-generated envelopes.
    pub agent_uri: String,
    /// Seconds between liveness pings.
    pub heartbeat_period_seconds: u64,
    /// Per-action timeout for external module executions, in seconds.
    pub action_timeout_seconds: u64,
    /// Timeout carried on outbound messages, in seconds.
    pub msg_timeout_seconds: u64,
    /// Initial reconnect backoff in seconds.
    pub reconnect_backoff_seconds: u64,
    /// Cap for the reconnect backoff in seconds.
    pub reconnect_backoff_cap_seconds: u64,
    /// Whether the supervisor waits for a login acknowledgment before
    /// dispatching inbound requests.
    pub login_ack: bool,
    /// Log filter expression consumed by the telemetry subscriber.
    pub log_filter: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spool_dir: defaults::default_spool_dir(),
            plugins_dir: defaults::default_plugins_dir(),
            broker_url: Url::parse(DEFAULT_BROKER_URL).expect("default broker URL is well-formed"),
            ca_crt: None,
            client_crt: None,
            client_key: None,
            agent_uri: DEFAULT_AGENT_URI.to_string(),
            heartbeat_period_seconds: DEFAULT_HEARTBEAT_PERIOD_SECS,
            action_timeout_seconds: DEFAULT_ACTION_TIMEOUT_SECS,
            msg_timeout_seconds: DEFAULT_MSG_TIMEOUT_SECS,
            reconnect_backoff_seconds: DEFAULT_RECONNECT_BACKOFF_SECS,
            reconnect_backoff_cap_seconds: DEFAULT_RECONNECT_BACKOFF_CAP_SECS,
            login_ack: false,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_format: defaults::default_log_format(),
        }
    }
}

impl Config {
    /// Loads the configuration from defaults, file, environment, and the
    /// supplied overrides, then validates the result.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the file cannot be read or parsed,
    /// an environment value is malformed, or the resolved configuration
    /// violates an invariant (unsupported broker scheme, missing TLS
    /// material for a `wss` endpoint).
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let file_path = overrides
            .config_path
            .clone()
            .or_else(|| env::var(CONFIG_PATH_ENV).ok().map(Utf8PathBuf::from));
        if let Some(path) = file_path {
            let path = expand_tilde(path);
            config.apply_file(&path)?;
        }

        config.apply_env()?;
        config.apply_overrides(overrides);
        config.finalise()?;
        Ok(config)
    }

    /// Heartbeat period as a [`Duration`].
    #[must_use]
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_period_seconds)
    }

    /// Per-action timeout as a [`Duration`].
    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_seconds)
    }

    /// Initial reconnect backoff as a [`Duration`].
    #[must_use]
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_seconds)
    }

    /// Reconnect backoff cap as a [`Duration`].
    #[must_use]
    pub fn reconnect_backoff_cap(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_cap_seconds)
    }

    /// Whether the broker endpoint requires TLS.
    #[must_use]
    pub fn broker_is_secure(&self) -> bool {
        self.broker_url.scheme() == "wss"
    }

    fn apply_file(&mut self, path: &Utf8PathBuf) -> Result<(), ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::File {
            path: path.clone(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        file.merge_into(self);
        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_string("SPOOL_DIR") {
            self.spool_dir = Utf8PathBuf::from(value);
        }
        if let Some(value) = env_string("PLUGINS_DIR") {
            self.plugins_dir = Utf8PathBuf::from(value);
        }
        if let Some(value) = env_string("BROKER_URL") {
            self.broker_url = parse_url(&value)?;
        }
        if let Some(value) = env_string("CA_CRT") {
            self.ca_crt = Some(Utf8PathBuf::from(value));
        }
        if let Some(value) = env_string("CLIENT_CRT") {
            self.client_crt = Some(Utf8PathBuf::from(value));
        }
        if let Some(value) = env_string("CLIENT_KEY") {
            self.client_key = Some(Utf8PathBuf::from(value));
        }
        if let Some(value) = env_string("AGENT_URI") {
            self.agent_uri = value;
        }
        if let Some(value) = env_string("HEARTBEAT_PERIOD_SECONDS") {
            self.heartbeat_period_seconds = parse_seconds("heartbeat-period-seconds", &value)?;
        }
        if let Some(value) = env_string("ACTION_TIMEOUT_SECONDS") {
            self.action_timeout_seconds = parse_seconds("action-timeout-seconds", &value)?;
        }
        if let Some(value) = env_string("MSG_TIMEOUT_SECONDS") {
            self.msg_timeout_seconds = parse_seconds("msg-timeout-seconds", &value)?;
        }
        if let Some(value) = env_string("RECONNECT_BACKOFF_SECONDS") {
            self.reconnect_backoff_seconds = parse_seconds("reconnect-backoff-seconds", &value)?;
        }
        if let Some(value) = env_string("RECONNECT_BACKOFF_CAP_SECONDS") {
            self.reconnect_backoff_cap_seconds =
                parse_seconds("reconnect-backoff-cap-seconds", &value)?;
        }
        if let Some(value) = env_string("LOGIN_ACK") {
            self.login_ack = parse_bool("login-ack", &value)?;
        }
        if let Some(value) = env_string("LOG_FILTER") {
            self.log_filter = value;
        }
        if let Some(value) = env_string("LOG_FORMAT") {
            self.log_format =
                LogFormat::from_str(&value).map_err(|_| ConfigError::InvalidValue {
                    key: "log-format",
                    value,
                })?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(value) = &overrides.spool_dir {
            self.spool_dir = value.clone();
        }
        if let Some(value) = &overrides.plugins_dir {
            self.plugins_dir = value.clone();
        }
        if let Some(value) = &overrides.broker_url {
            self.broker_url = value.clone();
        }
        if let Some(value) = &overrides.ca_crt {
            self.ca_crt = Some(value.clone());
        }
        if let Some(value) = &overrides.client_crt {
            self.client_crt = Some(value.clone());
        }
        if let Some(value) = &overrides.client_key {
            self.client_key = Some(value.clone());
        }
        if let Some(value) = &overrides.agent_uri {
            self.agent_uri = value.clone();
        }
        if let Some(value) = overrides.heartbeat_period_seconds {
            self.heartbeat_period_seconds = value;
        }
        if let Some(value) = overrides.action_timeout_seconds {
            self.action_timeout_seconds = value;
        }
        if let Some(value) = overrides.msg_timeout_seconds {
            self.msg_timeout_seconds = value;
        }
        if let Some(value) = overrides.reconnect_backoff_seconds {
            self.reconnect_backoff_seconds = value;
        }
        if let Some(value) = overrides.reconnect_backoff_cap_seconds {
            self.reconnect_backoff_cap_seconds = value;
        }
        if let Some(value) = overrides.login_ack {
            self.login_ack = value;
        }
        if let Some(value) = &overrides.log_filter {
            self.log_filter = value.clone();
        }
        if let Some(value) = overrides.log_format {
            self.log_format = value;
        }
    }

    /// Expands paths, normalises the spool directory, and checks the
    /// resolved configuration against its invariants.
    fn finalise(&mut self) -> Result<(), ConfigError> {
        self.spool_dir = normalise_spool_dir(expand_tilde(self.spool_dir.clone()));
        self.plugins_dir = expand_tilde(self.plugins_dir.clone());
        self.ca_crt = self.ca_crt.take().map(expand_tilde);
        self.client_crt = self.client_crt.take().map(expand_tilde);
        self.client_key = self.client_key.take().map(expand_tilde);

        match self.broker_url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ConfigError::UnsupportedScheme {
                    scheme: other.to_string(),
                });
            }
        }

        if self.broker_is_secure() {
            for (key, value) in [
                ("ca-crt", &self.ca_crt),
                ("client-crt", &self.client_crt),
                ("client-key", &self.client_key),
            ] {
                if value.is_none() {
                    return Err(ConfigError::MissingTlsMaterial { key });
                }
            }
        }

        Ok(())
    }
}

/// Explicit overrides, typically gathered from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<Utf8PathBuf>,
    pub spool_dir: Option<Utf8PathBuf>,
    pub plugins_dir: Option<Utf8PathBuf>,
    pub broker_url: Option<Url>,
    pub ca_crt: Option<Utf8PathBuf>,
    pub client_crt: Option<Utf8PathBuf>,
    pub client_key: Option<Utf8PathBuf>,
    pub agent_uri: Option<String>,
    pub heartbeat_period_seconds: Option<u64>,
    pub action_timeout_seconds: Option<u64>,
    pub msg_timeout_seconds: Option<u64>,
    pub reconnect_backoff_seconds: Option<u64>,
    pub reconnect_backoff_cap_seconds: Option<u64>,
    pub login_ack: Option<bool>,
    pub log_filter: Option<String>,
    pub log_format: Option<LogFormat>,
}

/// On-disk representation of the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FileConfig {
    spool_dir: Option<Utf8PathBuf>,
    plugins_dir: Option<Utf8PathBuf>,
    broker_url: Option<Url>,
    ca_crt: Option<Utf8PathBuf>,
    client_crt: Option<Utf8PathBuf>,
    client_key: Option<Utf8PathBuf>,
    agent_uri: Option<String>,
    heartbeat_period_seconds: Option<u64>,
    action_timeout_seconds: Option<u64>,
    msg_timeout_seconds: Option<u64>,
    reconnect_backoff_seconds: Option<u64>,
    reconnect_backoff_cap_seconds: Option<u64>,
    login_ack: Option<bool>,
    log_filter: Option<String>,
    log_format: Option<LogFormat>,
}

impl FileConfig {
    fn merge_into(self, config: &mut Config) {
        if let Some(value) = self.spool_dir {
            config.spool_dir = value;
        }
        if let Some(value) = self.plugins_dir {
            config.plugins_dir = value;
        }
        if let Some(value) = self.broker_url {
            config.broker_url = value;
        }
        if let Some(value) = self.ca_crt {
            config.ca_crt = Some(value);
        }
        if let Some(value) = self.client_crt {
            config.client_crt = Some(value);
        }
        if let Some(value) = self.client_key {
            config.client_key = Some(value);
        }
        if let Some(value) = self.agent_uri {
            config.agent_uri = value;
        }
        if let Some(value) = self.heartbeat_period_seconds {
            config.heartbeat_period_seconds = value;
        }
        if let Some(value) = self.action_timeout_seconds {
            config.action_timeout_seconds = value;
        }
        if let Some(value) = self.msg_timeout_seconds {
            config.msg_timeout_seconds = value;
        }
        if let Some(value) = self.reconnect_backoff_seconds {
            config.reconnect_backoff_seconds = value;
        }
        if let Some(value) = self.reconnect_backoff_cap_seconds {
            config.reconnect_backoff_cap_seconds = value;
        }
        if let Some(value) = self.login_ack {
            config.login_ack = value;
        }
        if let Some(value) = self.log_filter {
            config.log_filter = value;
        }
        if let Some(value) = self.log_format {
            config.log_format = value;
        }
    }
}

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file '{path}': {source}")]
    File {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file '{path}': {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// A URL value was malformed.
    #[error("invalid broker URL '{value}': {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    /// A scalar value could not be parsed for the named key.
    #[error("invalid value '{value}' for configuration key '{key}'")]
    InvalidValue { key: &'static str, value: String },
    /// The broker URL uses a scheme other than `ws` or `wss`.
    #[error("unsupported broker URL scheme '{scheme}' (expected 'ws' or 'wss')")]
    UnsupportedScheme { scheme: String },
    /// A `wss` broker endpoint is configured without full TLS material.
    #[error("broker URL uses 'wss' but configuration key '{key}' is not set")]
    MissingTlsMaterial { key: &'static str },
}

fn env_string(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}")).ok()
}

fn parse_url(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        value: value.to_string(),
        source,
    })
}

fn parse_seconds(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn expand_tilde(path: Utf8PathBuf) -> Utf8PathBuf {
    let Some(rest) = path.as_str().strip_prefix("~/") else {
        return path;
    };
    let Some(home) = dirs::home_dir().and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok()) else {
        return path;
    };
    home.join(rest)
}

fn normalise_spool_dir(path: Utf8PathBuf) -> Utf8PathBuf {
    let text = path.as_str();
    if text.ends_with('/') {
        path
    } else {
        Utf8PathBuf::from(format!("{text}/"))
    }
}
