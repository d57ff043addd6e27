//! The connection supervisor: one logical broker session.
//!
//! The supervisor drives the session state machine
//! (`Disconnected → Connecting → Authenticating → Open → Reconnecting →
//! Closed`). Opening a session dials the broker (TLS when the URL is
//! `wss`), sends a schema-validated login envelope, and — when configured —
//! waits for a login acknowledgment before dispatching. While open, the
//! inbound poll loop feeds text frames to the dispatcher and pongs to the
//! liveness monitor; the heartbeat task runs on its own thread.
//!
//! When the channel leaves the open state the supervisor waits one
//! backoff interval and re-runs the open sequence. A connection error
//! raised by that attempt is fatal. The backoff doubles across rapid
//! session failures, up to the configured cap, and resets once a session
//! stays open for at least the cap interval.

pub mod channel;
pub mod heartbeat;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, info, warn};

use heddle_config::Config;
use heddle_proto::{Envelope, LOGIN_SCHEMA_URI, MessageType};

use crate::dispatch::InboundDispatcher;
use crate::errors::FatalError;
use crate::reply::{ReplySender, SendError};

pub use channel::{Channel, ChannelError, ChannelEvent, TlsError, build_tls_connector};
pub use heartbeat::{HeartbeatTask, LivenessMonitor, PING_PAYLOAD};

/// Tracing target for session supervision.
const SUPERVISOR_TARGET: &str = "heddled::supervisor";

/// Endpoint the login envelope is addressed to.
const LOGIN_ENDPOINT: &str = "cth://server";

/// Tick used while sleeping the reconnect backoff.
const BACKOFF_TICK: Duration = Duration::from_millis(200);

/// States of the logical broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No socket exists.
    Disconnected,
    /// The socket is being dialled.
    Connecting,
    /// The login exchange is in progress.
    Authenticating,
    /// The session is serving inbound traffic.
    Open,
    /// The channel was lost; a reconnect is pending.
    Reconnecting,
    /// The session has ended for good.
    Closed,
}

/// Maintains the broker session and feeds the dispatcher.
pub struct ConnectionSupervisor {
    config: Config,
    channel: Arc<Channel>,
    liveness: Arc<LivenessMonitor>,
    reply: Arc<ReplySender<Channel>>,
    state: Mutex<SessionState>,
    shutdown: Arc<AtomicBool>,
}

impl ConnectionSupervisor {
    /// Creates a supervisor over the given channel.
    #[must_use]
    pub fn new(
        config: Config,
        channel: Arc<Channel>,
        liveness: Arc<LivenessMonitor>,
        reply: Arc<ReplySender<Channel>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            channel,
            liveness,
            reply,
            state: Mutex::new(SessionState::Disconnected),
            shutdown,
        }
    }

    /// Returns the current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Runs the session until shutdown or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns a [`FatalError`] when the initial connect, the login
    /// exchange, or a reconnection attempt fails.
    pub fn run(&self, dispatcher: &InboundDispatcher<Channel>) -> Result<(), FatalError> {
        if let Err(error) = self.open_session() {
            self.set_state(SessionState::Closed);
            return Err(error);
        }

        let heartbeat = HeartbeatTask::start(
            Arc::clone(&self.channel),
            Arc::clone(&self.liveness),
            self.config.heartbeat_period(),
        );

        let mut backoff = self.config.reconnect_backoff();
        let result = loop {
            let session_started = Instant::now();
            self.serve(dispatcher);
            if self.shutdown.load(Ordering::Acquire) {
                info!(target: SUPERVISOR_TARGET, "shutting down the session");
                break Ok(());
            }

            self.set_state(SessionState::Reconnecting);
            warn!(
                target: SUPERVISOR_TARGET,
                backoff_secs = backoff.as_secs(),
                "channel is no longer open; reconnecting after backoff"
            );
            if !self.sleep_backoff(backoff) {
                break Ok(());
            }

            if let Err(error) = self.open_session() {
                break Err(FatalError::Reconnect {
                    message: error.to_string(),
                });
            }
            backoff = next_backoff(
                backoff,
                self.config.reconnect_backoff(),
                self.config.reconnect_backoff_cap(),
                session_started.elapsed(),
            );
        };

        heartbeat.stop();
        self.channel.close();
        self.set_state(SessionState::Closed);
        result
    }

    /// Runs the open sequence: dial, login, optional acknowledgment.
    fn open_session(&self) -> Result<(), FatalError> {
        self.set_state(SessionState::Connecting);

        let tls = if self.config.broker_is_secure() {
            Some(self.build_tls()?)
        } else {
            None
        };

        self.channel
            .connect(&self.config.broker_url, tls)
            .map_err(|error| FatalError::Connect {
                message: error.to_string(),
            })?;

        self.set_state(SessionState::Authenticating);
        self.send_login()?;
        if self.config.login_ack {
            self.await_login_ack()?;
        }

        self.set_state(SessionState::Open);
        info!(
            target: SUPERVISOR_TARGET,
            broker = %self.config.broker_url,
            "session open"
        );
        Ok(())
    }

    fn build_tls(&self) -> Result<native_tls::TlsConnector, FatalError> {
        let (Some(ca_crt), Some(client_crt), Some(client_key)) = (
            self.config.ca_crt.as_ref(),
            self.config.client_crt.as_ref(),
            self.config.client_key.as_ref(),
        ) else {
            // Config::load guarantees the material for wss endpoints.
            return Err(FatalError::Tls {
                message: String::from("TLS material is not configured"),
            });
        };
        build_tls_connector(
            ca_crt.as_std_path(),
            client_crt.as_std_path(),
            client_key.as_std_path(),
        )
        .map_err(|error| FatalError::Tls {
            message: error.to_string(),
        })
    }

    fn send_login(&self) -> Result<(), FatalError> {
        let payload = json!({ "type": "agent" });
        self.reply
            .send(
                &[LOGIN_ENDPOINT.to_string()],
                MessageType::Login,
                self.config.msg_timeout_seconds,
                payload,
                &[],
            )
            .map_err(|error| match error {
                SendError::InvalidEnvelope { errors } => FatalError::OutboundEnvelope { errors },
                SendError::Connection(connection_error) => FatalError::Login {
                    message: connection_error.to_string(),
                },
            })?;
        info!(target: SUPERVISOR_TARGET, "sent login");
        Ok(())
    }

    /// Blocks until the broker echoes a login-schema frame, bounded by the
    /// message timeout.
    fn await_login_ack(&self) -> Result<(), FatalError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.msg_timeout_seconds);
        while Instant::now() < deadline {
            if self.shutdown.load(Ordering::Acquire) {
                return Ok(());
            }
            match self.channel.poll() {
                ChannelEvent::Frame(frame) => {
                    if frame_is_login_ack(&frame) {
                        debug!(target: SUPERVISOR_TARGET, "login acknowledged");
                        return Ok(());
                    }
                    debug!(
                        target: SUPERVISOR_TARGET,
                        "ignoring frame while awaiting the login acknowledgment"
                    );
                }
                ChannelEvent::Pong(payload) => self.liveness.record_pong(&payload),
                ChannelEvent::Idle => {}
                ChannelEvent::Closed => {
                    return Err(FatalError::Login {
                        message: String::from(
                            "channel closed while awaiting the login acknowledgment",
                        ),
                    });
                }
            }
        }
        Err(FatalError::Login {
            message: String::from("timed out waiting for the login acknowledgment"),
        })
    }

    /// Serves inbound traffic until the channel closes or shutdown is
    /// requested.
    fn serve(&self, dispatcher: &InboundDispatcher<Channel>) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            match self.channel.poll() {
                ChannelEvent::Frame(frame) => dispatcher.handle_frame(&frame),
                ChannelEvent::Pong(payload) => self.liveness.record_pong(&payload),
                ChannelEvent::Idle => {}
                ChannelEvent::Closed => return,
            }
        }
    }

    /// Sleeps the backoff in shutdown-aware ticks; returns `false` when
    /// interrupted.
    fn sleep_backoff(&self, backoff: Duration) -> bool {
        let deadline = Instant::now() + backoff;
        while Instant::now() < deadline {
            if self.shutdown.load(Ordering::Acquire) {
                return false;
            }
            thread::sleep(BACKOFF_TICK.min(backoff));
        }
        true
    }
}

/// Computes the backoff for the next reconnection.
///
/// Doubles while sessions die quickly, capped; resets to the initial
/// value once a session stayed open for at least the cap interval.
fn next_backoff(
    current: Duration,
    initial: Duration,
    cap: Duration,
    session_duration: Duration,
) -> Duration {
    if session_duration >= cap {
        initial
    } else {
        (current * 2).min(cap)
    }
}

fn frame_is_login_ack(frame: &str) -> bool {
    serde_json::from_str::<Envelope>(frame)
        .map(|envelope| envelope.data_schema() == LOGIN_SCHEMA_URI)
        .unwrap_or(false)
}
