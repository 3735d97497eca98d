//! Error taxonomy.
//!
//! Internal plumbing propagates with `anyhow::Result` + `.context(...)`,
//! matching the teacher's idiom throughout `vault/` and `auth/`. Boundary
//! operations (consolidate, grade, detect-gaps, ...) don't raise either —
//! they return their own typed result struct with a `status` field, per the
//! replace-exceptions design note. Lookups that can legitimately come up
//! empty (a line, a box score, an injury report) return `Result<Option<T>>`
//! rather than treating absence as an error. `classify` below is what lets
//! `retry.rs` tell a transient failure from a permanent one and decide
//! whether to back off and retry or give up immediately.

use std::fmt;

/// Coarse classification used by the retry loop to decide whether a raw
/// `anyhow::Error` surfaced from a store call is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Inspect an error chain for markers of transient failure. Grounded on
/// `bigquery_retry.py`'s classification: rate limiting, unavailability, and
/// deadline/timeout errors are retried; malformed requests, missing
/// resources, and auth failures are not.
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    let msg = err.to_string().to_lowercase();
    const TRANSIENT_MARKERS: &[&str] = &[
        "rate limit",
        "quota",
        "unavailable",
        "deadline exceeded",
        "timed out",
        "timeout",
        "connection reset",
        "try again",
        "database is locked",
        "serialization",
        "conflict",
    ];
    const PERMANENT_MARKERS: &[&str] = &[
        "bad request",
        "not found",
        "permission denied",
        "unauthorized",
        "invalid",
        "schema mismatch",
        "constraint failed",
    ];

    if PERMANENT_MARKERS.iter().any(|m| msg.contains(m)) {
        return ErrorClass::Permanent;
    }
    if TRANSIENT_MARKERS.iter().any(|m| msg.contains(m)) {
        return ErrorClass::Transient;
    }
    // Unknown errors default to transient: a spurious retry costs a few
    // seconds, a spuriously abandoned operation costs a missed batch.
    ErrorClass::Transient
}

/// Status reported by a top-level operation (`consolidate`, `gradeDate`, ...).
/// Maps to the process exit codes in the operational surface: `Success` is 0,
/// `Failure`/`WriteFailed`/`DuplicatesDetected` are 1 (recoverable, alert
/// warning), and `Critical` is 2 — reserved for an operation that could not
/// even attempt its work (store unreachable, lock subsystem down).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Success,
    NoData,
    Failure,
    WriteFailed,
    DuplicatesDetected,
    Critical,
}

impl OperationStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            OperationStatus::Success | OperationStatus::NoData => 0,
            OperationStatus::Failure
            | OperationStatus::WriteFailed
            | OperationStatus::DuplicatesDetected => 1,
            OperationStatus::Critical => 2,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Success => "success",
            OperationStatus::NoData => "no_data",
            OperationStatus::Failure => "failure",
            OperationStatus::WriteFailed => "write_failed",
            OperationStatus::DuplicatesDetected => "duplicates_detected",
            OperationStatus::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_quota_as_transient() {
        let err = anyhow::anyhow!("Quota exceeded for this project");
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn classifies_bad_request_as_permanent() {
        let err = anyhow::anyhow!("Bad Request: invalid column name");
        assert_eq!(classify(&err), ErrorClass::Permanent);
    }

    #[test]
    fn exit_codes_match_operational_contract() {
        assert_eq!(OperationStatus::Success.exit_code(), 0);
        assert_eq!(OperationStatus::Failure.exit_code(), 1);
        assert_eq!(OperationStatus::DuplicatesDetected.exit_code(), 1);
    }
}
