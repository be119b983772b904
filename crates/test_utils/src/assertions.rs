//! Custom Test Assertions
//!
//! Provides assertion helpers for job statuses that give more meaningful
//! error messages than standard assertions.

use core_kernel::JobId;
use domain_submission::{JobState, JobStatus, JobStatusPort};

/// Asserts that a job's status row exists and is in `expected`
///
/// # Panics
///
/// Panics if the row is missing, the lookup fails or the state differs
pub async fn assert_job_state(
    statuses: &dyn JobStatusPort,
    job_id: JobId,
    expected: JobState,
) -> JobStatus {
    let status = statuses
        .find_by(job_id)
        .await
        .expect("status lookup failed")
        .unwrap_or_else(|| panic!("no status row for {job_id}"));
    assert_eq!(
        status.status, expected,
        "Job {} expected {}, got {} (error: {:?})",
        job_id, expected, status.status, status.error_message
    );
    status
}

/// Asserts that every row in `statuses` is terminal
pub fn assert_all_terminal(statuses: &[JobStatus]) {
    for status in statuses {
        assert!(
            status.status.is_terminal(),
            "Job {} ({}) is not terminal: {}",
            status.job_id,
            status.job_class,
            status.status
        );
    }
}
