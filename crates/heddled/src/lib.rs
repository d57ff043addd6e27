//! The heddle agent daemon.
//!
//! `heddled` holds a persistent, mutually-authenticated WebSocket session
//! with a message-fabric broker and dispatches inbound *action requests* to
//! locally installed modules. Blocking requests are answered inline;
//! non-blocking requests are acknowledged immediately with a job id, run on
//! a tracked worker thread, and persisted to a per-job spool directory.
//!
//! The crate is organised around the request processor:
//!
//! - [`spool`] owns the on-disk layout for job state and captured streams;
//! - [`tracker`] owns background task handles and the reaper;
//! - [`processor`] routes requests, spawns jobs, and sequences the
//!   two-phase reply protocol;
//! - [`supervisor`] maintains the broker session (open, login, heartbeat,
//!   reconnect) and feeds inbound frames to [`dispatch`];
//! - [`reply`] serialises and validates every self-generated envelope.

pub mod bootstrap;
pub mod dispatch;
pub mod errors;
pub mod offline;
pub mod processor;
pub mod reply;
pub mod shutdown;
pub mod spool;
pub mod supervisor;
pub mod telemetry;
pub mod tracker;

pub use bootstrap::{Agent, bootstrap, build_registry};
pub use errors::{FatalError, ProcessingError};
pub use shutdown::install_signal_handlers;

#[cfg(test)]
mod tests;
