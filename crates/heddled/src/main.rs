use std::io;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use url::Url;

use heddle_config::{Config, ConfigOverrides, LogFormat};

/// Command-line interface for the heddle agent.
#[derive(Parser, Debug)]
#[command(
    name = "heddled",
    version,
    about = "Remote execution agent for a message-fabric broker"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, value_name = "FILE")]
    config_path: Option<Utf8PathBuf>,
    /// Spool root for job state and captured streams.
    #[arg(long, value_name = "DIR")]
    spool_dir: Option<Utf8PathBuf>,
    /// Directory scanned for external module plugins.
    #[arg(long, value_name = "DIR")]
    plugins_dir: Option<Utf8PathBuf>,
    /// Broker endpoint (ws:// or wss://).
    #[arg(long, value_name = "URL")]
    broker_url: Option<Url>,
    /// CA certificate bundle for the broker channel.
    #[arg(long, value_name = "FILE")]
    ca_crt: Option<Utf8PathBuf>,
    /// Client certificate presented to the broker.
    #[arg(long, value_name = "FILE")]
    client_crt: Option<Utf8PathBuf>,
    /// Private key matching the client certificate.
    #[arg(long, value_name = "FILE")]
    client_key: Option<Utf8PathBuf>,
    /// Sender URI stamped on outbound envelopes.
    #[arg(long, value_name = "URI")]
    agent_uri: Option<String>,
    /// Seconds between liveness pings.
    #[arg(long, value_name = "SECONDS")]
    heartbeat_period_seconds: Option<u64>,
    /// Per-action timeout for external modules.
    #[arg(long, value_name = "SECONDS")]
    action_timeout_seconds: Option<u64>,
    /// Timeout carried on outbound messages.
    #[arg(long, value_name = "SECONDS")]
    msg_timeout_seconds: Option<u64>,
    /// Initial reconnect backoff.
    #[arg(long, value_name = "SECONDS")]
    reconnect_backoff_seconds: Option<u64>,
    /// Cap for the reconnect backoff.
    #[arg(long, value_name = "SECONDS")]
    reconnect_backoff_cap_seconds: Option<u64>,
    /// Wait for a login acknowledgment before dispatching.
    #[arg(long, value_name = "BOOL")]
    login_ack: Option<bool>,
    /// Log filter expression (tracing syntax).
    #[arg(long, value_name = "FILTER")]
    log_filter: Option<String>,
    /// Log output format (json or compact).
    #[arg(long, value_name = "FORMAT", value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Executes a module action locally, reading params from stdin.
    Run {
        /// Module name.
        module: String,
        /// Action name.
        action: String,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config_path.clone(),
            spool_dir: self.spool_dir.clone(),
            plugins_dir: self.plugins_dir.clone(),
            broker_url: self.broker_url.clone(),
            ca_crt: self.ca_crt.clone(),
            client_crt: self.client_crt.clone(),
            client_key: self.client_key.clone(),
            agent_uri: self.agent_uri.clone(),
            heartbeat_period_seconds: self.heartbeat_period_seconds,
            action_timeout_seconds: self.action_timeout_seconds,
            msg_timeout_seconds: self.msg_timeout_seconds,
            reconnect_backoff_seconds: self.reconnect_backoff_seconds,
            reconnect_backoff_cap_seconds: self.reconnect_backoff_cap_seconds,
            login_ack: self.login_ack,
            log_filter: self.log_filter.clone(),
            log_format: self.log_format,
        }
    }
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    LogFormat::from_str(value).map_err(|_| format!("unknown log format '{value}'"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let overrides = cli.overrides();
    let config = match Config::load(&overrides) {
        Ok(config) => config,
        Err(source) => {
            let error = heddled::FatalError::Configuration { source };
            eprintln!("heddled: {error}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(CliCommand::Run { module, action }) => run_offline(config, &module, &action),
        None => run_agent(config),
    }
}

fn run_agent(config: Config) -> ExitCode {
    let agent = match heddled::bootstrap(config) {
        Ok(agent) => agent,
        Err(error) => {
            eprintln!("heddled: {error}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(error) = heddled::install_signal_handlers(Arc::clone(&shutdown)) {
        eprintln!("heddled: {error}");
        return ExitCode::FAILURE;
    }

    match agent.run(shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("heddled: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run_offline(config: Config, module: &str, action: &str) -> ExitCode {
    if let Err(error) = heddled::telemetry::initialise(&config) {
        eprintln!("heddled: {error}");
        return ExitCode::FAILURE;
    }
    let registry = heddled::build_registry(&config);
    let timeout = Duration::from_secs(config.action_timeout_seconds);

    let stdin = io::stdin();
    let stdout = io::stdout();
    match heddled::offline::run_action(
        &registry,
        module,
        action,
        timeout,
        &mut stdin.lock(),
        &mut stdout.lock(),
    ) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("heddled: {error}");
            ExitCode::FAILURE
        }
    }
}
