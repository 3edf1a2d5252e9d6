//! Tests for kgflow-core: ids, status, failure info, errors

use kgflow_core::*;

// ===========================================================================
// ExecutionId
// ===========================================================================

#[test]
fn execution_id_new_and_display() {
    let id = ExecutionId::new("exec-123");
    assert_eq!(id.as_str(), "exec-123");
    assert_eq!(format!("{}", id), "exec-123");
}

#[test]
fn execution_id_generate_is_unique() {
    let a = ExecutionId::generate();
    let b = ExecutionId::generate();
    assert_ne!(a, b);
}

#[test]
fn execution_id_serde_as_string() {
    let id: ExecutionId = "abc".into();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, r#""abc""#);
    let back: ExecutionId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

// ===========================================================================
// ExecutionStatus
// ===========================================================================

#[test]
fn status_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&ExecutionStatus::Success).unwrap(), r#""success""#);
    assert_eq!(serde_json::to_string(&ExecutionStatus::Cancelled).unwrap(), r#""cancelled""#);
}

#[test]
fn status_exit_codes() {
    assert_eq!(ExecutionStatus::Success.exit_code(), 0);
    assert_eq!(ExecutionStatus::Failed.exit_code(), 1);
    assert_eq!(ExecutionStatus::Cancelled.exit_code(), 4);
    assert_eq!(ExecutionStatus::Timeout.exit_code(), 5);
}

// ===========================================================================
// FailureInfo
// ===========================================================================

#[test]
fn failure_info_carries_step_id() {
    let err = Error::step("ex:build", StepErrorKind::Cli, "exit code 2");
    let info = FailureInfo::from_error(&err);
    assert_eq!(info.kind, "StepError");
    assert_eq!(info.step_id.as_deref(), Some("ex:build"));
    assert!(info.message.contains("exit code 2"));
}

#[test]
fn failure_info_without_step() {
    let info = FailureInfo::from_error(&Error::lock("build", "held elsewhere"));
    assert_eq!(info.kind, "LockError");
    assert!(info.step_id.is_none());
    let json = serde_json::to_value(&info).unwrap();
    assert!(json.get("stepId").is_none());
}

#[test]
fn query_error_display() {
    let err = Error::query(QueryErrorKind::Syntax, "unexpected '}'");
    assert_eq!(err.to_string(), "query error (syntax): unexpected '}'");
}

#[test]
fn io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: Error = io.into();
    assert_eq!(err.kind_name(), "IoError");
}
