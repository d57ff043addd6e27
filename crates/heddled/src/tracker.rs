//! Ownership of background action tasks.
//!
//! Every non-blocking job registers its thread handle together with the
//! shared *done flag* the task sets as its final observable action. The
//! flag is the single source of truth for task liveness: a background
//! reaper periodically joins any task whose flag is set and drops it from
//! the collection, so the tracker never joins (or abandons) a task that is
//! still writing its spool files.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Tracing target for task tracking.
const TRACKER_TARGET: &str = "heddled::tracker";

/// Interval between reaper sweeps.
const REAPER_INTERVAL: Duration = Duration::from_secs(2);

/// Tick used while polling for completion during shutdown.
const DRAIN_TICK: Duration = Duration::from_millis(100);

struct TrackedTask {
    label: String,
    handle: JoinHandle<()>,
    done: Arc<AtomicBool>,
}

/// Monitor owning the collection of live background tasks.
#[derive(Debug)]
pub struct JobTracker {
    entries: Arc<Mutex<Vec<TrackedTask>>>,
    stop: Arc<AtomicBool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TrackedTask {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TrackedTask")
            .field("label", &self.label)
            .field("done", &self.done.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl JobTracker {
    /// Creates a tracker and starts its reaper thread.
    #[must_use]
    pub fn new() -> Self {
        let entries: Arc<Mutex<Vec<TrackedTask>>> = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let reaper_entries = Arc::clone(&entries);
        let reaper_stop = Arc::clone(&stop);
        let reaper = thread::spawn(move || {
            while !reaper_stop.load(Ordering::Acquire) {
                reap(&reaper_entries);
                sleep_with_stop(REAPER_INTERVAL, &reaper_stop);
            }
        });

        Self {
            entries,
            stop,
            reaper: Mutex::new(Some(reaper)),
        }
    }

    /// Registers an in-flight task with the flag it sets on exit.
    pub fn add(&self, label: impl Into<String>, handle: JoinHandle<()>, done: Arc<AtomicBool>) {
        let label = label.into();
        debug!(target: TRACKER_TARGET, task = label.as_str(), "tracking task");
        lock(&self.entries).push(TrackedTask {
            label,
            handle,
            done,
        });
    }

    /// Returns the number of tasks not yet reaped.
    #[must_use]
    pub fn active(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Stops the reaper, grants running tasks a bounded grace period, then
    /// abandons whatever is still running.
    ///
    /// An abandoned job legitimately leaves its spool entry at
    /// `status = running`; a recovery sweep outside the agent may mark such
    /// entries stale.
    pub fn shutdown(&self, grace: Duration) {
        self.stop.store(true, Ordering::Release);
        if let Some(reaper) = lock(&self.reaper).take()
            && reaper.join().is_err()
        {
            warn!(target: TRACKER_TARGET, "reaper thread panicked");
        }

        let deadline = Instant::now() + grace;
        loop {
            reap(&self.entries);
            let remaining = self.active();
            if remaining == 0 {
                info!(target: TRACKER_TARGET, "all tasks drained");
                return;
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(DRAIN_TICK);
        }

        let abandoned = std::mem::take(&mut *lock(&self.entries));
        for task in &abandoned {
            warn!(
                target: TRACKER_TARGET,
                task = task.label.as_str(),
                "abandoning task still running after the grace period"
            );
        }
        // Dropping the handles detaches the threads.
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for JobTracker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(reaper) = lock(&self.reaper).take() {
            drop(reaper.join());
        }
    }
}

/// Joins every task whose done flag is set and removes it.
fn reap(entries: &Mutex<Vec<TrackedTask>>) {
    let finished: Vec<TrackedTask> = {
        let mut entries = lock(entries);
        let mut finished = Vec::new();
        let mut index = 0;
        while index < entries.len() {
            if entries[index].done.load(Ordering::Acquire) {
                finished.push(entries.swap_remove(index));
            } else {
                index += 1;
            }
        }
        finished
    };

    for task in finished {
        debug!(
            target: TRACKER_TARGET,
            task = task.label.as_str(),
            "reaping finished task"
        );
        if task.handle.join().is_err() {
            warn!(
                target: TRACKER_TARGET,
                task = task.label.as_str(),
                "task thread panicked"
            );
        }
    }
}

fn sleep_with_stop(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline && !stop.load(Ordering::Acquire) {
        thread::sleep(DRAIN_TICK.min(total));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
