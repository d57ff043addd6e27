//! Unit tests for inbound frame admission.

use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use crate::spool::SpoolStore;

use super::*;
use crate::tests::support::RecordingTransport;

struct Harness {
    _spool_dir: TempDir,
    transport: Arc<RecordingTransport>,
    dispatcher: InboundDispatcher<RecordingTransport>,
}

#[fixture]
fn harness() -> Harness {
    let spool_dir = TempDir::new().expect("temp spool");
    let spool = SpoolStore::open(spool_dir.path()).expect("spool should open");
    let transport = Arc::new(RecordingTransport::default());
    let reply = Arc::new(ReplySender::new(
        Arc::clone(&transport),
        "cth://host-1/agent",
    ));
    let processor = Arc::new(RequestProcessor::new(
        Arc::clone(&reply),
        spool,
        Duration::from_secs(5),
        10,
    ));
    let registry = Arc::new(ModuleRegistry::with_builtins());
    let dispatcher = InboundDispatcher::new(registry, processor, reply, 10);
    Harness {
        _spool_dir: spool_dir,
        transport,
        dispatcher,
    }
}

fn request_frame(data: serde_json::Value) -> String {
    json!({
        "id": "req-1",
        "version": "1",
        "expires": "2026-08-02T12:00:00Z",
        "sender": "cth://controller/server",
        "endpoints": ["cth://host-1/agent"],
        "hops": [],
        "data_schema": "http://puppetlabs.com/cncschema",
        "data": data,
    })
    .to_string()
}

#[rstest]
fn well_formed_blocking_request_is_answered(harness: Harness) {
    harness.dispatcher.handle_frame(&request_frame(json!({
        "transaction_id": "t1",
        "module": "echo",
        "action": "run",
        "params": {"message": "hi"},
    })));

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(
        envelopes[0]["data_schema"],
        "http://puppetlabs.com/rpc_blocking_response"
    );
    assert_eq!(envelopes[0]["data"]["results"]["outcome"], "hi");
}

#[rstest]
#[case::not_json("{not json")]
#[case::not_an_envelope(r#"{"id": "x"}"#)]
fn malformed_frames_are_dropped_without_a_reply(harness: Harness, #[case] frame: &str) {
    harness.dispatcher.handle_frame(frame);
    assert!(harness.transport.frames().is_empty());
}

#[rstest]
fn invalid_data_chunk_is_dropped_without_a_reply(harness: Harness) {
    // Envelope-valid, but the data chunk is missing required cnc fields.
    harness
        .dispatcher
        .handle_frame(&request_frame(json!({"module": "echo"})));
    assert!(harness.transport.frames().is_empty());
}

#[rstest]
fn non_cnc_schema_is_ignored(harness: Harness) {
    let frame = json!({
        "id": "login-1",
        "version": "1",
        "expires": "2026-08-02T12:00:00Z",
        "sender": "cth://controller/server",
        "endpoints": ["cth://host-1/agent"],
        "hops": [],
        "data_schema": "http://puppetlabs.com/loginschema",
        "data": {"type": "agent"},
    })
    .to_string();
    harness.dispatcher.handle_frame(&frame);
    assert!(harness.transport.frames().is_empty());
}

#[rstest]
fn unknown_module_is_answered_with_an_rpc_error(harness: Harness) {
    harness.dispatcher.handle_frame(&request_frame(json!({
        "transaction_id": "t2",
        "module": "nope",
        "action": "run",
        "params": {},
    })));

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0]["data_schema"], "http://puppetlabs.com/rpc_error");
    assert_eq!(envelopes[0]["data"]["transaction_id"], "t2");
    assert_eq!(envelopes[0]["data"]["id"], "req-1");
    let description = envelopes[0]["data"]["description"]
        .as_str()
        .expect("description should be a string");
    assert!(description.contains("unknown module 'nope'"));
}

#[rstest]
fn failing_blocking_request_is_answered_with_an_rpc_error(harness: Harness) {
    // echo rejects params without a message.
    harness.dispatcher.handle_frame(&request_frame(json!({
        "transaction_id": "t3",
        "module": "echo",
        "action": "run",
        "params": {},
    })));

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0]["data_schema"], "http://puppetlabs.com/rpc_error");
}

#[rstest]
fn unknown_action_is_answered_with_an_rpc_error(harness: Harness) {
    harness.dispatcher.handle_frame(&request_frame(json!({
        "transaction_id": "t4",
        "module": "echo",
        "action": "shout",
        "params": {"message": "hi"},
    })));

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes.len(), 1);
    let description = envelopes[0]["data"]["description"]
        .as_str()
        .expect("description should be a string");
    assert!(description.contains("unknown action 'shout'"));
}

#[rstest]
fn non_blocking_request_routes_to_the_background_path(harness: Harness) {
    harness.dispatcher.handle_frame(&request_frame(json!({
        "transaction_id": "t5",
        "module": "ping",
        "action": "run",
        "params": {},
        "notify_outcome": true,
    })));

    // Wait for both the provisional and the completion reply.
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while harness.transport.frames().len() < 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes.len(), 2);
    let provisional = envelopes
        .iter()
        .find(|envelope| {
            envelope["data_schema"] == "http://puppetlabs.com/rpc_provisional_response"
        })
        .expect("provisional reply should be sent");
    assert_eq!(provisional["data"]["success"], true);
    let completion = envelopes
        .iter()
        .find(|envelope| {
            envelope["data_schema"] == "http://puppetlabs.com/rpc_non_blocking_response"
        })
        .expect("completion reply should be sent");
    assert_eq!(completion["data"]["results"]["outcome"], "pong");
}
