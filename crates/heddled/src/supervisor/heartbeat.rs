//! Channel liveness: periodic pings and pong-timeout accounting.
//!
//! The heartbeat task sends a ping with a fixed binary payload every
//! heartbeat period. Before each ping it checks whether the previous one
//! was answered; a missing pong increments the consecutive-timeout
//! counter, and any received pong resets it. The task never tears the
//! connection down by itself — the counter is diagnostic state for
//! operators and future policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::channel::Channel;

/// Tracing target for heartbeat operations.
const HEARTBEAT_TARGET: &str = "heddled::heartbeat";

/// Fixed binary payload carried on every ping.
pub const PING_PAYLOAD: &[u8] = b"heddle-agent";

/// Tick used to keep the heartbeat thread responsive to stop requests.
const TICK: Duration = Duration::from_millis(200);

/// Pong accounting shared between the heartbeat task and the inbound
/// poll loop.
#[derive(Debug, Default)]
pub struct LivenessMonitor {
    consecutive_pong_timeouts: Mutex<u32>,
    pong_seen: AtomicBool,
}

impl LivenessMonitor {
    /// Creates a monitor with a zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a received pong: resets the consecutive-timeout counter.
    pub fn record_pong(&self, payload: &[u8]) {
        debug!(
            target: HEARTBEAT_TARGET,
            payload = %String::from_utf8_lossy(payload),
            "received pong"
        );
        self.pong_seen.store(true, Ordering::Release);
        let mut count = self.lock_count();
        if *count > 0 {
            *count = 0;
        }
    }

    /// Records a missed pong and returns the new consecutive count.
    pub fn record_timeout(&self) -> u32 {
        let mut count = self.lock_count();
        *count += 1;
        *count
    }

    /// Returns the current consecutive-timeout count.
    #[must_use]
    pub fn consecutive_timeouts(&self) -> u32 {
        *self.lock_count()
    }

    /// Consumes the pong-seen marker set since the last call.
    pub fn take_pong_seen(&self) -> bool {
        self.pong_seen.swap(false, Ordering::AcqRel)
    }

    fn lock_count(&self) -> std::sync::MutexGuard<'_, u32> {
        self.consecutive_pong_timeouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background task pinging the broker on a fixed period.
#[derive(Debug)]
pub struct HeartbeatTask {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatTask {
    /// Starts the heartbeat thread.
    #[must_use]
    pub fn start(
        channel: Arc<Channel>,
        liveness: Arc<LivenessMonitor>,
        period: Duration,
    ) -> Self {
        info!(
            target: HEARTBEAT_TARGET,
            period_secs = period.as_secs(),
            "starting the heartbeat task"
        );
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || heartbeat_loop(&channel, &liveness, period, &thread_stop));
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signals the thread to stop and joins it.
    pub fn stop(mut self) {
        info!(target: HEARTBEAT_TARGET, "stopping the heartbeat task");
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!(target: HEARTBEAT_TARGET, "heartbeat thread panicked");
        }
    }
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            drop(handle.join());
        }
    }
}

fn heartbeat_loop(
    channel: &Channel,
    liveness: &LivenessMonitor,
    period: Duration,
    stop: &AtomicBool,
) {
    let mut awaiting_pong = false;
    while !stop.load(Ordering::Acquire) {
        if !sleep_period(period, stop) {
            break;
        }

        if !channel.is_open() {
            debug!(target: HEARTBEAT_TARGET, "skipping ping; channel is not open");
            awaiting_pong = false;
            continue;
        }

        if awaiting_pong && !liveness.take_pong_seen() {
            let consecutive = liveness.record_timeout();
            warn!(
                target: HEARTBEAT_TARGET,
                consecutive,
                "pong timeout"
            );
        }

        match channel.ping(PING_PAYLOAD) {
            Ok(()) => awaiting_pong = true,
            Err(error) => {
                warn!(target: HEARTBEAT_TARGET, error = %error, "failed to send ping");
                awaiting_pong = false;
            }
        }
    }
}

/// Sleeps one heartbeat period in stop-aware ticks; returns `false` when
/// interrupted.
fn sleep_period(period: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + period;
    while Instant::now() < deadline {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        thread::sleep(TICK.min(period));
    }
    true
}
