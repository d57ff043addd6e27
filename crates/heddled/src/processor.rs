//! The request processor: routing, job lifecycle, and the two-phase reply
//! protocol.
//!
//! Blocking requests execute inline on the dispatcher thread and answer
//! with a single `rpc_blocking_response`. Non-blocking requests are
//! acknowledged with a provisional reply carrying a freshly drawn job id,
//! then run on their own tracked thread. Before the provisional reply is
//! sent the job's spool directory exists and holds an initial `status`
//! record plus empty `stdout`/`stderr` placeholders, so an observer that
//! holds a job id can always resolve it on disk.
//!
//! The action task finishes by setting its done flag — strictly after
//! every spool write has returned — which is the signal the tracker's
//! reaper joins on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use heddle_modules::{ActionOutcome, ModuleDescriptor, ModuleError};
use heddle_proto::{MessageType, ParsedRequest};

use crate::errors::ProcessingError;
use crate::reply::{ReplySender, ReplyTransport};
use crate::spool::{SpoolError, SpoolStore, StatusRecord};
use crate::tracker::JobTracker;

/// Tracing target for request processing.
const PROCESSOR_TARGET: &str = "heddled::processor";

/// How many job ids are drawn before a collision becomes a processing
/// error.
const JOB_ID_ATTEMPTS: usize = 5;

/// Source of job identifiers.
///
/// The production implementation draws UUID v4 values; tests inject fixed
/// sequences to exercise collision handling.
pub trait JobIdSource: Send + Sync {
    /// Draws the next candidate job id.
    fn next_id(&self) -> String;
}

/// Draws random UUID v4 job ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidJobIds;

impl JobIdSource for UuidJobIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Executes validated action requests.
pub struct RequestProcessor<T> {
    reply: Arc<ReplySender<T>>,
    spool: SpoolStore,
    tracker: JobTracker,
    ids: Arc<dyn JobIdSource>,
    action_timeout: Duration,
    msg_timeout_secs: u64,
}

impl<T: ReplyTransport + 'static> RequestProcessor<T> {
    /// Creates a processor with its own job tracker.
    #[must_use]
    pub fn new(
        reply: Arc<ReplySender<T>>,
        spool: SpoolStore,
        action_timeout: Duration,
        msg_timeout_secs: u64,
    ) -> Self {
        Self {
            reply,
            spool,
            tracker: JobTracker::new(),
            ids: Arc::new(UuidJobIds),
            action_timeout,
            msg_timeout_secs,
        }
    }

    /// Substitutes the job id source (test seam).
    #[must_use]
    pub fn with_job_ids(mut self, ids: Arc<dyn JobIdSource>) -> Self {
        self.ids = ids;
        self
    }

    /// Returns the tracker owning this processor's background tasks.
    #[must_use]
    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Drains background tasks with the given grace period.
    pub fn shutdown(&self, grace: Duration) {
        self.tracker.shutdown(grace);
    }

    /// Executes a blocking request inline and answers with a blocking
    /// response carrying the outcome's results and the request's debug
    /// chunks.
    ///
    /// # Errors
    ///
    /// A [`ModuleError`] from execution propagates to the caller, which
    /// translates it into an `rpc_error` reply. A send failure is logged
    /// and swallowed: the broker must redrive.
    pub fn process_blocking(
        &self,
        module: &ModuleDescriptor,
        action: &str,
        request: &ParsedRequest,
    ) -> Result<(), ModuleError> {
        let outcome = module.execute(action, request.request().params(), self.action_timeout)?;

        let payload = json!({
            "transaction_id": request.request().transaction_id(),
            "results": outcome.results(),
        });
        if let Err(send_error) = self.reply.send(
            &[request.requester().to_string()],
            MessageType::BlockingResponse,
            self.msg_timeout_secs,
            payload,
            request.debug(),
        ) {
            // No retry: it is up to the requester to ask again.
            error!(
                target: PROCESSOR_TARGET,
                request_id = request.request_id(),
                requester = request.requester(),
                transaction_id = request.request().transaction_id(),
                error = %send_error,
                "failed to reply to blocking request"
            );
        }
        Ok(())
    }

    /// Sets up a non-blocking job and acknowledges it with a provisional
    /// reply.
    ///
    /// Every setup failure (spool creation, initial writes, task spawn) is
    /// reported as `success = false` on the provisional reply; nothing
    /// propagates to the caller.
    pub fn process_non_blocking(
        &self,
        module: &ModuleDescriptor,
        action: &str,
        request: &ParsedRequest,
    ) {
        let transaction_id = request.request().transaction_id();
        let mut err_msg = String::new();

        let (job_id, job_dir) = match self.prepare_job() {
            Ok((job_id, job_dir)) => (job_id, Some(job_dir)),
            Err((job_id, error)) => {
                warn!(
                    target: PROCESSOR_TARGET,
                    module = module.module_name(),
                    action,
                    transaction_id,
                    error = %error,
                    "failed to set up job spool"
                );
                err_msg = error.to_string();
                (job_id, None)
            }
        };

        if let Some(job_dir) = &job_dir {
            debug!(
                target: PROCESSOR_TARGET,
                module = module.module_name(),
                action,
                job_id = job_id.as_str(),
                transaction_id,
                "starting job"
            );
            match self.initialise_spool(job_dir, module, action, request) {
                Ok(()) => {
                    if let Err(spawn_error) =
                        self.spawn_task(module, action, request, &job_id, job_dir)
                    {
                        err_msg = spawn_error;
                    }
                }
                Err(error) => {
                    err_msg = format!("failed to initialise job spool: {error}");
                }
            }
        }

        let mut payload = json!({
            "transaction_id": transaction_id,
            "success": err_msg.is_empty(),
            "job_id": job_id,
        });
        if !err_msg.is_empty() {
            payload["error"] = json!(err_msg);
        }

        match self.reply.send(
            &[request.requester().to_string()],
            MessageType::ProvisionalResponse,
            self.msg_timeout_secs,
            payload,
            request.debug(),
        ) {
            Ok(()) => {
                info!(
                    target: PROCESSOR_TARGET,
                    request_id = request.request_id(),
                    requester = request.requester(),
                    transaction_id,
                    "sent provisional response"
                );
            }
            Err(send_error) => {
                error!(
                    target: PROCESSOR_TARGET,
                    request_id = request.request_id(),
                    requester = request.requester(),
                    transaction_id,
                    error = %send_error,
                    "failed to send provisional response (no further attempts)"
                );
            }
        }
    }

    /// Draws a job id and creates its spool directory, regenerating the id
    /// on collision up to a small bound.
    ///
    /// On failure the last drawn id is returned alongside the error so the
    /// provisional reply can still name a job.
    fn prepare_job(&self) -> Result<(String, PathBuf), (String, ProcessingError)> {
        let mut job_id = self.ids.next_id();
        for _ in 0..JOB_ID_ATTEMPTS {
            match self.spool.prepare_job(&job_id) {
                Ok(job_dir) => return Ok((job_id, job_dir)),
                Err(SpoolError::Collision { path }) => {
                    warn!(
                        target: PROCESSOR_TARGET,
                        job_id = job_id.as_str(),
                        path = %path.display(),
                        "job id collision, drawing a fresh id"
                    );
                    job_id = self.ids.next_id();
                }
                Err(error) => {
                    return Err((
                        job_id,
                        ProcessingError::new(format!("failed to create job directory: {error}")),
                    ));
                }
            }
        }
        Err((
            job_id,
            ProcessingError::new("exhausted job id attempts without an unused directory"),
        ))
    }

    /// Writes the initial status record and empty stream placeholders.
    fn initialise_spool(
        &self,
        job_dir: &Path,
        module: &ModuleDescriptor,
        action: &str,
        request: &ParsedRequest,
    ) -> Result<(), SpoolError> {
        let record = StatusRecord::running(
            module.module_name(),
            action,
            request.request().params_text(),
        );
        self.spool.write_status(job_dir, &record)?;
        self.spool.write_streams(job_dir, b"", b"")
    }

    /// Spawns the action task and registers it with the tracker.
    ///
    /// Returns the error message to surface on the provisional reply when
    /// the thread cannot be created.
    fn spawn_task(
        &self,
        module: &ModuleDescriptor,
        action: &str,
        request: &ParsedRequest,
        job_id: &str,
        job_dir: &Path,
    ) -> Result<(), String> {
        let done = Arc::new(AtomicBool::new(false));
        let context = TaskContext {
            module: module.clone(),
            action: action.to_string(),
            request: request.clone(),
            job_id: job_id.to_string(),
            job_dir: job_dir.to_path_buf(),
            spool: self.spool.clone(),
            reply: Arc::clone(&self.reply),
            action_timeout: self.action_timeout,
            msg_timeout_secs: self.msg_timeout_secs,
            done: Arc::clone(&done),
        };

        let spawned = thread::Builder::new()
            .name(format!("action-{job_id}"))
            .spawn(move || non_blocking_action_task(context));
        match spawned {
            Ok(handle) => {
                self.tracker.add(job_id, handle, done);
                Ok(())
            }
            Err(error) => {
                error!(
                    target: PROCESSOR_TARGET,
                    module = module.module_name(),
                    action,
                    job_id,
                    error = %error,
                    "failed to spawn action task"
                );
                Err(format!("failed to start action task: {error}"))
            }
        }
    }
}

/// Everything an action task carries onto its thread.
struct TaskContext<T> {
    module: ModuleDescriptor,
    action: String,
    request: ParsedRequest,
    job_id: String,
    job_dir: PathBuf,
    spool: SpoolStore,
    reply: Arc<ReplySender<T>>,
    action_timeout: Duration,
    msg_timeout_secs: u64,
    done: Arc<AtomicBool>,
}

/// Body of a non-blocking action task.
fn non_blocking_action_task<T: ReplyTransport>(context: TaskContext<T>) {
    let request_id = context.request.request_id();
    let requester = context.request.requester();
    let transaction_id = context.request.request().transaction_id();

    let timer = Instant::now();
    let outcome = context.module.execute(
        &context.action,
        context.request.request().params(),
        context.action_timeout,
    );

    match &outcome {
        Ok(outcome) => {
            if context.request.request().notify_outcome() {
                let payload = json!({
                    "transaction_id": transaction_id,
                    "job_id": context.job_id,
                    "results": outcome.results(),
                });
                // Debug chunks were already forwarded on the provisional
                // reply.
                match context.reply.send(
                    &[requester.to_string()],
                    MessageType::NonBlockingResponse,
                    context.msg_timeout_secs,
                    payload,
                    &[],
                ) {
                    Ok(()) => {
                        info!(
                            target: PROCESSOR_TARGET,
                            request_id,
                            requester,
                            transaction_id,
                            "sent response for non-blocking request"
                        );
                    }
                    Err(send_error) => {
                        error!(
                            target: PROCESSOR_TARGET,
                            request_id,
                            requester,
                            transaction_id,
                            error = %send_error,
                            "failed to reply to non-blocking request (no further attempts)"
                        );
                    }
                }
            }
        }
        Err(module_error) => {
            let payload = json!({
                "transaction_id": transaction_id,
                "id": request_id,
                "description": module_error.to_string(),
            });
            match context.reply.send(
                &[requester.to_string()],
                MessageType::RpcError,
                context.msg_timeout_secs,
                payload,
                &[],
            ) {
                Ok(()) => {
                    info!(
                        target: PROCESSOR_TARGET,
                        request_id,
                        requester,
                        transaction_id,
                        "replied to non-blocking request with an RPC error"
                    );
                }
                Err(send_error) => {
                    error!(
                        target: PROCESSOR_TARGET,
                        request_id,
                        requester,
                        transaction_id,
                        error = %send_error,
                        "failed to send RPC error (no further attempts)"
                    );
                }
            }
        }
    }

    // Persist the final state. Wall time covers execution and the reply
    // above, floored to whole seconds.
    let duration_secs = timer.elapsed().as_secs();
    let record = StatusRecord::running(
        context.module.module_name(),
        &context.action,
        context.request.request().params_text(),
    )
    .completed(duration_secs);
    if let Err(error) = context.spool.write_status(&context.job_dir, &record) {
        error!(
            target: PROCESSOR_TARGET,
            job_id = context.job_id.as_str(),
            error = %error,
            "failed to write final status"
        );
    }

    let stream_result = match outcome {
        Ok(ActionOutcome::External { stdout, stderr, .. }) => context
            .spool
            .write_stream(&context.job_dir, "stdout", &stdout)
            .and_then(|()| {
                if stderr.is_empty() {
                    Ok(())
                } else {
                    context.spool.write_stream(&context.job_dir, "stderr", &stderr)
                }
            }),
        Ok(ActionOutcome::Internal { results }) => context.spool.write_stream(
            &context.job_dir,
            "stdout",
            results.to_string().as_bytes(),
        ),
        Err(module_error) => {
            let message = format!(
                "Failed to execute '{} {}': {module_error}",
                context.module.module_name(),
                context.action
            );
            context
                .spool
                .write_stream(&context.job_dir, "stderr", message.as_bytes())
        }
    };
    if let Err(error) = stream_result {
        error!(
            target: PROCESSOR_TARGET,
            job_id = context.job_id.as_str(),
            error = %error,
            "failed to write job streams"
        );
    }

    // The flag flips only after every spool write has returned; the
    // reaper may join as soon as it observes it.
    context.done.store(true, Ordering::Release);
}

#[cfg(test)]
mod tests;
