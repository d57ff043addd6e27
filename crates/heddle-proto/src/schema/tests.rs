//! Unit tests for schema URIs and frame validation.

use rstest::rstest;
use serde_json::{Value, json};

use super::*;

fn well_formed_envelope() -> Value {
    json!({
        "id": "4f8b2f1c-0000-4000-8000-000000000001",
        "version": "1",
        "expires": "2026-08-02T12:00:00Z",
        "sender": "cth://controller/server",
        "endpoints": ["cth://host-1/agent"],
        "hops": [],
        "data_schema": CNC_SCHEMA_URI,
        "data": {
            "transaction_id": "t1",
            "module": "echo",
            "action": "run",
            "params": {"message": "hi"}
        }
    })
}

#[rstest]
#[case(MessageType::Login, "http://puppetlabs.com/loginschema")]
#[case(MessageType::BlockingResponse, "http://puppetlabs.com/rpc_blocking_response")]
#[case(MessageType::ProvisionalResponse, "http://puppetlabs.com/rpc_provisional_response")]
#[case(MessageType::NonBlockingResponse, "http://puppetlabs.com/rpc_non_blocking_response")]
#[case(MessageType::RpcError, "http://puppetlabs.com/rpc_error")]
fn message_type_uris(#[case] kind: MessageType, #[case] uri: &str) {
    assert_eq!(kind.uri(), uri);
}

#[test]
fn accepts_well_formed_envelope() {
    validate_envelope(&well_formed_envelope()).expect("envelope should validate");
}

#[rstest]
#[case("id")]
#[case("version")]
#[case("expires")]
#[case("sender")]
#[case("endpoints")]
#[case("hops")]
#[case("data_schema")]
#[case("data")]
fn rejects_envelope_missing_required_field(#[case] field: &str) {
    let mut envelope = well_formed_envelope();
    envelope
        .as_object_mut()
        .expect("fixture is an object")
        .remove(field);
    let error = validate_envelope(&envelope).expect_err("envelope should be rejected");
    assert!(matches!(
        error,
        crate::error::ValidationError::Envelope { .. }
    ));
}

#[test]
fn rejects_envelope_with_non_object_data() {
    let mut envelope = well_formed_envelope();
    envelope["data"] = json!("not an object");
    validate_envelope(&envelope).expect_err("envelope should be rejected");
}

#[test]
fn accepts_cnc_data_with_notify_outcome() {
    let data = json!({
        "transaction_id": "t1",
        "module": "pkg",
        "action": "install",
        "params": {"name": "vim"},
        "notify_outcome": true
    });
    validate_cnc_data(&data).expect("cnc data should validate");
}

#[rstest]
#[case(json!({"module": "echo", "action": "run", "params": {}}))]
#[case(json!({"transaction_id": "t1", "action": "run", "params": {}}))]
#[case(json!({"transaction_id": "t1", "module": "echo", "params": {}}))]
#[case(json!({"transaction_id": "t1", "module": "echo", "action": "run"}))]
fn rejects_cnc_data_missing_required_field(#[case] data: Value) {
    validate_cnc_data(&data).expect_err("cnc data should be rejected");
}

#[rstest]
#[case(json!({"transaction_id": "t1", "module": "", "action": "run", "params": {}}))]
#[case(json!({"transaction_id": "t1", "module": "echo", "action": "", "params": {}}))]
fn rejects_empty_module_or_action(#[case] data: Value) {
    validate_cnc_data(&data).expect_err("empty names should be rejected");
}

#[test]
fn rejects_non_boolean_notify_outcome() {
    let data = json!({
        "transaction_id": "t1",
        "module": "pkg",
        "action": "install",
        "params": {},
        "notify_outcome": "yes"
    });
    validate_cnc_data(&data).expect_err("notify_outcome must be boolean");
}
