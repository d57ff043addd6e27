//! Unit tests for the request processor, driven through a recording
//! transport and a temporary spool.

use std::collections::VecDeque;
use std::sync::Mutex;

use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;

use heddle_modules::InternalAction;
use heddle_proto::{CNC_SCHEMA_URI, Envelope, EnvelopeHeader};

use super::*;
use crate::spool::JobStatus;
use crate::tests::support::RecordingTransport;

struct FailingAction;

impl InternalAction for FailingAction {
    fn call(&self, _params: &Value) -> Result<Value, ModuleError> {
        Err(ModuleError::Execution {
            module: String::from("fail"),
            action: String::from("run"),
            message: String::from("E: no space"),
        })
    }
}

struct SlowEcho;

impl InternalAction for SlowEcho {
    fn call(&self, params: &Value) -> Result<Value, ModuleError> {
        thread::sleep(Duration::from_millis(150));
        Ok(json!({"outcome": params.get("message").cloned().unwrap_or(Value::Null)}))
    }
}

/// Draws ids from a fixed sequence, then falls back to UUIDs.
struct SequencedIds {
    queue: Mutex<VecDeque<String>>,
}

impl SequencedIds {
    fn new(ids: &[&str]) -> Self {
        Self {
            queue: Mutex::new(ids.iter().map(|id| (*id).to_string()).collect()),
        }
    }
}

impl JobIdSource for SequencedIds {
    fn next_id(&self) -> String {
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

struct Harness {
    _spool_dir: TempDir,
    spool_root: PathBuf,
    transport: Arc<RecordingTransport>,
    processor: RequestProcessor<RecordingTransport>,
}

fn harness_with_ids(ids: Option<Arc<dyn JobIdSource>>) -> Harness {
    let spool_dir = TempDir::new().expect("temp spool");
    let spool_root = spool_dir.path().to_path_buf();
    let spool = SpoolStore::open(&spool_root).expect("spool should open");
    let transport = Arc::new(RecordingTransport::default());
    let reply = Arc::new(ReplySender::new(
        Arc::clone(&transport),
        "cth://host-1/agent",
    ));
    let mut processor = RequestProcessor::new(reply, spool, Duration::from_secs(5), 10);
    if let Some(ids) = ids {
        processor = processor.with_job_ids(ids);
    }
    Harness {
        _spool_dir: spool_dir,
        spool_root,
        transport,
        processor,
    }
}

#[fixture]
fn harness() -> Harness {
    harness_with_ids(None)
}

fn echo_module() -> ModuleDescriptor {
    heddle_modules::builtin::all()
        .into_iter()
        .find(|descriptor| descriptor.module_name() == "echo")
        .expect("echo is a built-in")
}

fn failing_module() -> ModuleDescriptor {
    ModuleDescriptor::new("fail").with_internal("run", Arc::new(FailingAction))
}

fn make_request(
    module: &str,
    action: &str,
    params: Value,
    notify_outcome: Option<bool>,
    debug: Vec<Value>,
) -> ParsedRequest {
    let mut data = json!({
        "transaction_id": "t1",
        "module": module,
        "action": action,
        "params": params,
    });
    if let Some(notify) = notify_outcome {
        data["notify_outcome"] = json!(notify);
    }
    let header = EnvelopeHeader::new(
        "req-1",
        "cth://controller/server",
        "2026-08-02T12:00:00Z",
        vec!["cth://host-1/agent".to_string()],
    );
    let envelope = Envelope::new(header, CNC_SCHEMA_URI, data).with_debug(debug);
    ParsedRequest::from_envelope(&envelope).expect("request should parse")
}

fn read_status(spool_root: &std::path::Path, job_id: &str) -> StatusRecord {
    let raw = std::fs::read_to_string(spool_root.join(job_id).join("status"))
        .expect("status should read");
    serde_json::from_str(raw.trim()).expect("status should parse")
}

// ---------------------------------------------------------------------------
// Blocking path
// ---------------------------------------------------------------------------

#[rstest]
fn blocking_echo_round_trip(harness: Harness) {
    let request = make_request(
        "echo",
        "run",
        json!({"message": "hi"}),
        None,
        vec![json!({"hop": "broker-1"})],
    );

    harness
        .processor
        .process_blocking(&echo_module(), "run", &request)
        .expect("blocking echo should succeed");

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes.len(), 1);
    let reply = &envelopes[0];
    assert_eq!(
        reply["data_schema"],
        "http://puppetlabs.com/rpc_blocking_response"
    );
    assert_eq!(reply["data"]["transaction_id"], "t1");
    assert_eq!(reply["data"]["results"]["outcome"], "hi");
    assert_eq!(reply["endpoints"], json!(["cth://controller/server"]));
    // Debug chunks ride on the blocking final reply.
    assert_eq!(reply["debug"], json!([{"hop": "broker-1"}]));

    // No spool entry is created on the blocking path.
    let entries = std::fs::read_dir(&harness.spool_root)
        .expect("spool should list")
        .count();
    assert_eq!(entries, 0);
}

#[rstest]
fn blocking_failure_propagates_to_the_caller(harness: Harness) {
    let request = make_request("fail", "run", json!({}), None, vec![]);
    let error = harness
        .processor
        .process_blocking(&failing_module(), "run", &request)
        .expect_err("failure should propagate");
    assert!(matches!(error, ModuleError::Execution { .. }));
    // The caller owns the rpc_error translation; nothing was sent here.
    assert!(harness.transport.frames().is_empty());
}

#[rstest]
fn blocking_send_failure_is_swallowed(harness: Harness) {
    let transport = Arc::new(RecordingTransport::rejecting("gone"));
    let reply = Arc::new(ReplySender::new(
        Arc::clone(&transport),
        "cth://host-1/agent",
    ));
    let spool = SpoolStore::open(&harness.spool_root).expect("spool should open");
    let processor = RequestProcessor::new(reply, spool, Duration::from_secs(5), 10);

    let request = make_request("echo", "run", json!({"message": "hi"}), None, vec![]);
    processor
        .process_blocking(&echo_module(), "run", &request)
        .expect("send failure is not a request failure");
}

// ---------------------------------------------------------------------------
// Non-blocking path
// ---------------------------------------------------------------------------

#[rstest]
fn non_blocking_success_with_notification(harness: Harness) {
    let request = make_request(
        "echo",
        "run",
        json!({"message": "hi"}),
        Some(true),
        vec![json!({"hop": "broker-1"})],
    );

    harness
        .processor
        .process_non_blocking(&echo_module(), "run", &request);
    harness.processor.shutdown(Duration::from_secs(10));

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes.len(), 2);

    let provisional = envelopes
        .iter()
        .find(|envelope| {
            envelope["data_schema"] == "http://puppetlabs.com/rpc_provisional_response"
        })
        .expect("provisional reply should be sent");
    assert_eq!(provisional["data"]["transaction_id"], "t1");
    assert_eq!(provisional["data"]["success"], true);
    assert_eq!(provisional["debug"], json!([{"hop": "broker-1"}]));
    let job_id = provisional["data"]["job_id"]
        .as_str()
        .expect("job id should be a string")
        .to_string();

    let completion = envelopes
        .iter()
        .find(|envelope| {
            envelope["data_schema"] == "http://puppetlabs.com/rpc_non_blocking_response"
        })
        .expect("completion reply should be sent");
    assert_eq!(completion["data"]["job_id"], job_id.as_str());
    assert_eq!(completion["data"]["results"]["outcome"], "hi");
    // Debug chunks are not repeated on the completion reply.
    assert!(completion.get("debug").is_none());

    let status = read_status(&harness.spool_root, &job_id);
    assert_eq!(status.status(), JobStatus::Completed);
    assert_eq!(status.input(), r#"{"message":"hi"}"#);

    let stdout = std::fs::read_to_string(harness.spool_root.join(&job_id).join("stdout"))
        .expect("stdout should read");
    assert_eq!(stdout, "{\"outcome\":\"hi\"}\n");
    let stderr = std::fs::read(harness.spool_root.join(&job_id).join("stderr"))
        .expect("stderr should read");
    assert!(stderr.is_empty());
}

#[rstest]
fn non_blocking_without_notification_sends_only_the_provisional(harness: Harness) {
    let request = make_request("echo", "run", json!({"message": "hi"}), Some(false), vec![]);

    harness
        .processor
        .process_non_blocking(&echo_module(), "run", &request);
    harness.processor.shutdown(Duration::from_secs(10));

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(
        envelopes[0]["data_schema"],
        "http://puppetlabs.com/rpc_provisional_response"
    );

    let job_id = envelopes[0]["data"]["job_id"]
        .as_str()
        .expect("job id should be a string");
    assert_eq!(read_status(&harness.spool_root, job_id).status(), JobStatus::Completed);
}

#[rstest]
fn provisional_precedes_the_completion_reply(harness: Harness) {
    let module = ModuleDescriptor::new("slow").with_internal("run", Arc::new(SlowEcho));
    let request = make_request("slow", "run", json!({"message": "later"}), Some(true), vec![]);

    harness.processor.process_non_blocking(&module, "run", &request);
    harness.processor.shutdown(Duration::from_secs(10));

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes.len(), 2);
    assert_eq!(
        envelopes[0]["data_schema"],
        "http://puppetlabs.com/rpc_provisional_response"
    );
    assert_eq!(
        envelopes[1]["data_schema"],
        "http://puppetlabs.com/rpc_non_blocking_response"
    );
}

#[rstest]
fn non_blocking_failure_sends_an_rpc_error_and_records_stderr(harness: Harness) {
    let request = make_request("fail", "run", json!({"target": "/"}), Some(true), vec![]);

    harness
        .processor
        .process_non_blocking(&failing_module(), "run", &request);
    harness.processor.shutdown(Duration::from_secs(10));

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes.len(), 2);

    let provisional = envelopes
        .iter()
        .find(|envelope| {
            envelope["data_schema"] == "http://puppetlabs.com/rpc_provisional_response"
        })
        .expect("provisional reply should be sent");
    assert_eq!(provisional["data"]["success"], true);
    let job_id = provisional["data"]["job_id"]
        .as_str()
        .expect("job id should be a string");

    let rpc_error = envelopes
        .iter()
        .find(|envelope| envelope["data_schema"] == "http://puppetlabs.com/rpc_error")
        .expect("rpc error should be sent");
    assert_eq!(rpc_error["data"]["transaction_id"], "t1");
    assert_eq!(rpc_error["data"]["id"], "req-1");
    let description = rpc_error["data"]["description"]
        .as_str()
        .expect("description should be a string");
    assert!(description.contains("E: no space"));

    let stderr = std::fs::read_to_string(harness.spool_root.join(job_id).join("stderr"))
        .expect("stderr should read");
    assert!(stderr.starts_with("Failed to execute 'fail run': "));
    assert!(stderr.contains("E: no space"));
    assert_eq!(read_status(&harness.spool_root, job_id).status(), JobStatus::Completed);
}

#[rstest]
fn empty_params_record_the_literal_none(harness: Harness) {
    let request = make_request("fail", "run", json!({}), Some(false), vec![]);

    harness
        .processor
        .process_non_blocking(&failing_module(), "run", &request);
    harness.processor.shutdown(Duration::from_secs(10));

    let envelopes = harness.transport.envelopes();
    let job_id = envelopes[0]["data"]["job_id"]
        .as_str()
        .expect("job id should be a string");
    assert_eq!(read_status(&harness.spool_root, job_id).input(), "none");
}

// ---------------------------------------------------------------------------
// Job id collisions
// ---------------------------------------------------------------------------

#[test]
fn collision_draws_a_fresh_id() {
    let ids: Arc<dyn JobIdSource> = Arc::new(SequencedIds::new(&["dup", "fresh"]));
    let harness = harness_with_ids(Some(ids));
    std::fs::create_dir(harness.spool_root.join("dup")).expect("colliding dir should create");

    let request = make_request("echo", "run", json!({"message": "hi"}), Some(false), vec![]);
    harness
        .processor
        .process_non_blocking(&echo_module(), "run", &request);
    harness.processor.shutdown(Duration::from_secs(10));

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes[0]["data"]["success"], true);
    assert_eq!(envelopes[0]["data"]["job_id"], "fresh");
}

#[test]
fn exhausted_collisions_surface_as_a_failed_provisional() {
    let ids: Arc<dyn JobIdSource> =
        Arc::new(SequencedIds::new(&["dup", "dup", "dup", "dup", "dup", "dup"]));
    let harness = harness_with_ids(Some(ids));
    std::fs::create_dir(harness.spool_root.join("dup")).expect("colliding dir should create");

    let request = make_request("echo", "run", json!({"message": "hi"}), Some(true), vec![]);
    harness
        .processor
        .process_non_blocking(&echo_module(), "run", &request);
    harness.processor.shutdown(Duration::from_secs(10));

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes.len(), 1, "no task runs after a setup failure");
    let provisional = &envelopes[0];
    assert_eq!(provisional["data"]["success"], false);
    assert!(provisional["data"]["error"].is_string());
    assert_eq!(provisional["data"]["job_id"], "dup");
}
