//! The WebSocket channel to the fabric broker.
//!
//! A [`Channel`] wraps one `tungstenite` socket behind a mutex so the
//! inbound poll loop, the heartbeat task, and reply sends from action
//! threads can interleave safely. Reads carry a short timeout on the
//! underlying TCP stream, so [`Channel::poll`] returns
//! [`ChannelEvent::Idle`] regularly and callers can observe shutdown
//! flags between frames.
//!
//! `wss://` endpoints build a mutually-authenticated `native-tls`
//! connector from the configured CA bundle, client certificate, and key;
//! `ws://` endpoints connect plain.

use std::fs;
use std::io;
use std::net::TcpStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use native_tls::{Certificate, Identity, TlsConnector};
use thiserror::Error;
use tracing::{debug, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use url::Url;

use crate::reply::{ConnectionError, ReplyTransport};

/// Tracing target for channel operations.
const CHANNEL_TARGET: &str = "heddled::channel";

/// Read timeout on the underlying stream; bounds how long `poll` blocks.
const READ_POLL: Duration = Duration::from_millis(200);

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Outcome of one inbound poll.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A text frame arrived.
    Frame(String),
    /// A pong arrived with its payload.
    Pong(Vec<u8>),
    /// Nothing arrived within the poll window.
    Idle,
    /// The channel is no longer open.
    Closed,
}

/// Errors raised by channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel is not open.
    #[error("channel is not open")]
    NotOpen,

    /// The broker URL cannot be turned into a connectable address.
    #[error("invalid broker address '{url}': {message}")]
    Address {
        /// Offending URL.
        url: String,
        /// Description of the problem.
        message: String,
    },

    /// The TCP connection to the broker failed.
    #[error("failed to reach the broker at '{url}': {source}")]
    Dial {
        /// Dialled URL.
        url: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The WebSocket (or TLS) handshake failed.
    #[error("handshake with '{url}' failed: {message}")]
    Handshake {
        /// Dialled URL.
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// A frame could not be sent.
    #[error("failed to send on the channel: {message}")]
    SendFailed {
        /// Description of the failure.
        message: String,
    },
}

/// Errors raised while assembling the TLS connector.
#[derive(Debug, Error)]
pub enum TlsError {
    /// TLS material could not be read from disk.
    #[error("failed to read TLS material '{path}': {source}")]
    Read {
        /// Offending path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// TLS material could not be parsed or assembled.
    #[error("invalid TLS material: {message}")]
    Invalid {
        /// Description of the failure.
        message: String,
    },
}

/// Shared handle to the broker socket.
#[derive(Debug, Default)]
pub struct Channel {
    socket: Mutex<Option<Socket>>,
    open: AtomicBool,
}

impl Channel {
    /// Creates a disconnected channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the channel currently holds an open socket.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Dials the broker and performs the WebSocket handshake, replacing
    /// any previous socket.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] describing the failed step.
    pub fn connect(&self, url: &Url, tls: Option<TlsConnector>) -> Result<(), ChannelError> {
        let host = url.host_str().ok_or_else(|| ChannelError::Address {
            url: url.to_string(),
            message: String::from("missing host"),
        })?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ChannelError::Address {
                url: url.to_string(),
                message: String::from("missing port"),
            })?;

        let stream = TcpStream::connect((host, port)).map_err(|source| ChannelError::Dial {
            url: url.to_string(),
            source,
        })?;

        let request = url
            .as_str()
            .into_client_request()
            .map_err(|error| ChannelError::Address {
                url: url.to_string(),
                message: error.to_string(),
            })?;
        let connector = tls.map(tungstenite::Connector::NativeTls);
        let (socket, _response) =
            tungstenite::client_tls_with_config(request, stream, None, connector).map_err(
                |error| ChannelError::Handshake {
                    url: url.to_string(),
                    message: error.to_string(),
                },
            )?;

        set_read_timeout(&socket, READ_POLL);

        let mut guard = self.lock();
        *guard = Some(socket);
        self.open.store(true, Ordering::Release);
        debug!(target: CHANNEL_TARGET, url = %url, "channel open");
        Ok(())
    }

    /// Polls the socket for one inbound event.
    ///
    /// Pings are answered by the WebSocket library; binary frames are
    /// ignored.
    pub fn poll(&self) -> ChannelEvent {
        let mut guard = self.lock();
        let Some(socket) = guard.as_mut() else {
            return ChannelEvent::Closed;
        };

        match socket.read() {
            Ok(Message::Text(text)) => ChannelEvent::Frame(text),
            Ok(Message::Pong(payload)) => ChannelEvent::Pong(payload),
            Ok(Message::Ping(_)) => ChannelEvent::Idle,
            Ok(Message::Binary(_) | Message::Frame(_)) => {
                debug!(target: CHANNEL_TARGET, "ignoring non-text frame");
                ChannelEvent::Idle
            }
            Ok(Message::Close(_)) => {
                debug!(target: CHANNEL_TARGET, "broker closed the channel");
                self.mark_closed(&mut guard);
                ChannelEvent::Closed
            }
            Err(tungstenite::Error::Io(io_error))
                if io_error.kind() == io::ErrorKind::WouldBlock
                    || io_error.kind() == io::ErrorKind::TimedOut =>
            {
                ChannelEvent::Idle
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                self.mark_closed(&mut guard);
                ChannelEvent::Closed
            }
            Err(error) => {
                warn!(target: CHANNEL_TARGET, error = %error, "channel read failed");
                self.mark_closed(&mut guard);
                ChannelEvent::Closed
            }
        }
    }

    /// Sends one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotOpen`] when disconnected or
    /// [`ChannelError::SendFailed`] when the socket rejects the frame.
    pub fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.send_message(Message::Text(text.to_string()))
    }

    /// Sends a ping carrying the given payload.
    ///
    /// # Errors
    ///
    /// Same classification as [`Channel::send_text`].
    pub fn ping(&self, payload: &[u8]) -> Result<(), ChannelError> {
        self.send_message(Message::Ping(payload.to_vec()))
    }

    /// Closes the channel, dropping the socket.
    pub fn close(&self) {
        let mut guard = self.lock();
        if let Some(mut socket) = guard.take() {
            drop(socket.close(None));
            // Best-effort: flush the close frame before the drop.
            drop(socket.flush());
        }
        self.open.store(false, Ordering::Release);
    }

    fn send_message(&self, message: Message) -> Result<(), ChannelError> {
        let mut guard = self.lock();
        let Some(socket) = guard.as_mut() else {
            return Err(ChannelError::NotOpen);
        };
        match socket.send(message) {
            Ok(()) => Ok(()),
            Err(error) => {
                if matches!(
                    error,
                    tungstenite::Error::ConnectionClosed
                        | tungstenite::Error::AlreadyClosed
                        | tungstenite::Error::Io(_)
                ) {
                    self.mark_closed(&mut guard);
                }
                Err(ChannelError::SendFailed {
                    message: error.to_string(),
                })
            }
        }
    }

    fn mark_closed(&self, guard: &mut MutexGuard<'_, Option<Socket>>) {
        **guard = None;
        self.open.store(false, Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, Option<Socket>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReplyTransport for Channel {
    fn send_frame(&self, frame: &str) -> Result<(), ConnectionError> {
        self.send_text(frame)
            .map_err(|error| ConnectionError::new(error.to_string()))
    }
}

/// Builds a mutually-authenticated TLS connector from on-disk material.
///
/// # Errors
///
/// Returns a [`TlsError`] when the files cannot be read or do not parse
/// as PEM certificates / PKCS#8 keys.
pub fn build_tls_connector(
    ca_crt: &Path,
    client_crt: &Path,
    client_key: &Path,
) -> Result<TlsConnector, TlsError> {
    let ca_pem = read_material(ca_crt)?;
    let cert_pem = read_material(client_crt)?;
    let key_pem = read_material(client_key)?;

    let ca = Certificate::from_pem(&ca_pem).map_err(|error| TlsError::Invalid {
        message: format!("CA certificate: {error}"),
    })?;
    let identity = Identity::from_pkcs8(&cert_pem, &key_pem).map_err(|error| TlsError::Invalid {
        message: format!("client identity: {error}"),
    })?;

    TlsConnector::builder()
        .add_root_certificate(ca)
        .identity(identity)
        .build()
        .map_err(|error| TlsError::Invalid {
            message: error.to_string(),
        })
}

fn read_material(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        path: path.display().to_string(),
        source,
    })
}

fn set_read_timeout(socket: &Socket, timeout: Duration) {
    let result = match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout)),
        MaybeTlsStream::NativeTls(stream) => stream.get_ref().set_read_timeout(Some(timeout)),
        _ => Ok(()),
    };
    if let Err(error) = result {
        warn!(
            target: CHANNEL_TARGET,
            error = %error,
            "failed to set the channel read timeout"
        );
    }
}
