//! Behaviour tests for the plugin invoker, using real `/bin/sh` plugins.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use serde_json::json;
use tempfile::TempDir;

use super::*;

/// Writes an executable shell script into `dir` and returns its path.
pub(crate) fn write_plugin(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    let script = format!("#!/bin/sh\n{body}\n");
    fs::write(&path, script).expect("plugin script should write");
    let mut permissions = fs::metadata(&path)
        .expect("plugin metadata should read")
        .permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions).expect("plugin should become executable");
    path
}

#[test]
fn successful_plugin_yields_external_outcome() {
    let dir = TempDir::new().expect("temp dir");
    // Echoes the action name and the params document it received.
    let plugin = write_plugin(
        &dir,
        "pkg",
        r#"read params
printf '{"action":"%s","received":%s}' "$1" "$params"
printf 'progress log\n' >&2"#,
    );

    let outcome = invoke(
        "pkg",
        &plugin,
        "install",
        &json!({"name": "vim"}),
        Duration::from_secs(5),
    )
    .expect("plugin should run");

    let ActionOutcome::External {
        stdout,
        stderr,
        exit_code,
        results,
    } = outcome
    else {
        panic!("expected an external outcome");
    };
    assert_eq!(exit_code, 0);
    assert_eq!(results["action"], json!("install"));
    assert_eq!(results["received"], json!({"name": "vim"}));
    assert!(!stdout.is_empty());
    assert_eq!(String::from_utf8_lossy(&stderr), "progress log\n");
}

#[test]
fn non_zero_exit_quotes_the_stderr_tail() {
    let dir = TempDir::new().expect("temp dir");
    let plugin = write_plugin(&dir, "pkg", "printf 'E: no space' >&2\nexit 2");

    let error = invoke(
        "pkg",
        &plugin,
        "install",
        &json!({}),
        Duration::from_secs(5),
    )
    .expect_err("plugin should fail");

    let ModuleError::NonZeroExit {
        code, stderr_tail, ..
    } = &error
    else {
        panic!("expected a non-zero exit error, got {error}");
    };
    assert_eq!(*code, 2);
    assert!(stderr_tail.contains("E: no space"));
    assert!(error.to_string().contains("E: no space"));
}

#[test]
fn non_json_stdout_on_success_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let plugin = write_plugin(&dir, "pkg", "printf 'not json'");

    let error = invoke("pkg", &plugin, "status", &json!({}), Duration::from_secs(5))
        .expect_err("output should be rejected");
    assert!(matches!(error, ModuleError::NonJsonOutput { .. }));
    assert_eq!(error.to_string(), "plugin produced non-JSON output");
}

#[test]
fn slow_plugin_times_out() {
    let dir = TempDir::new().expect("temp dir");
    let plugin = write_plugin(&dir, "slow", "sleep 30");

    let started = Instant::now();
    let error = invoke("slow", &plugin, "run", &json!({}), Duration::from_secs(1))
        .expect_err("plugin should time out");

    assert!(matches!(error, ModuleError::Timeout { .. }));
    assert_eq!(error.to_string(), "plugin timed out after 1s");
    // The child must be reaped well before its own sleep would finish.
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn large_stdout_is_captured_verbatim() {
    let dir = TempDir::new().expect("temp dir");
    // ~1 MiB of payload, far beyond any pipe buffer.
    let plugin = write_plugin(
        &dir,
        "bulk",
        r#"printf '{"blob":"'
i=0
while [ $i -lt 16384 ]; do printf 'abcdefghabcdefghabcdefghabcdefghabcdefghabcdefghabcdefgh'; i=$((i+1)); done
printf '"}'"#,
    );

    let outcome = invoke("bulk", &plugin, "run", &json!({}), Duration::from_secs(30))
        .expect("plugin should run");
    let ActionOutcome::External {
        stdout, results, ..
    } = outcome
    else {
        panic!("expected an external outcome");
    };
    let blob = results["blob"].as_str().expect("blob should be a string");
    assert_eq!(blob.len(), 16384 * 56);
    assert!(stdout.len() > blob.len());
}

#[test]
fn missing_executable_is_a_spawn_error() {
    let error = invoke(
        "ghost",
        &PathBuf::from("/nonexistent/heddle-plugin"),
        "run",
        &json!({}),
        Duration::from_secs(1),
    )
    .expect_err("spawn should fail");
    assert!(matches!(error, ModuleError::Spawn { .. }));
}

#[test]
fn introspection_parses_a_declaration() {
    let dir = TempDir::new().expect("temp dir");
    let plugin = write_plugin(
        &dir,
        "pkg",
        r#"if [ "$1" = "metadata" ]; then
printf '{"module_name":"pkg","actions":{"install":{"input_schema":{"type":"object"},"output_schema":{"type":"object"}}}}'
fi"#,
    );

    let metadata = introspect(&plugin).expect("introspection should succeed");
    assert_eq!(metadata.module_name(), "pkg");
    assert!(metadata.actions().contains_key("install"));
}

#[test]
fn introspection_rejects_invalid_declarations() {
    let dir = TempDir::new().expect("temp dir");

    let not_json = write_plugin(&dir, "bad-json", "printf 'nope'");
    let error = introspect(&not_json).expect_err("declaration should be rejected");
    assert!(matches!(error, ModuleError::Metadata { .. }));

    let empty_name = write_plugin(
        &dir,
        "bad-name",
        r#"printf '{"module_name":"","actions":{}}'"#,
    );
    let error = introspect(&empty_name).expect_err("empty name should be rejected");
    assert!(matches!(error, ModuleError::Metadata { .. }));

    let failing = write_plugin(&dir, "bad-exit", "exit 3");
    let error = introspect(&failing).expect_err("non-zero exit should be rejected");
    assert!(matches!(error, ModuleError::Metadata { .. }));
}
