//! Property-Based Test Generators
//!
//! Provides proptest strategies for job states and backend replies.

use proptest::prelude::*;

use domain_submission::{BackendReply, BackendResponse, JobState, TransportError};

/// Strategy for every persisted job state
pub fn job_state_strategy() -> impl Strategy<Value = JobState> {
    prop_oneof![
        Just(JobState::Trying),
        Just(JobState::Retrying),
        Just(JobState::Success),
        Just(JobState::NonRetryableError),
        Just(JobState::Exhausted),
    ]
}

/// Strategy for a terminal job state
pub fn terminal_state_strategy() -> impl Strategy<Value = JobState> {
    prop_oneof![
        Just(JobState::Success),
        Just(JobState::NonRetryableError),
        Just(JobState::Exhausted),
    ]
}

/// Strategy for an optional error message
pub fn error_message_strategy() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[a-z_]{3,20}: [a-zA-Z ]{0,40}")
}

/// Strategy for arbitrary backend replies, including garbage bodies
pub fn backend_reply_strategy() -> impl Strategy<Value = BackendReply> {
    prop_oneof![
        (100u16..600, ".{0,64}").prop_map(|(status, body)| Ok(BackendResponse::new(status, body))),
        (200u16..300, any::<i64>()).prop_map(|(status, id)| {
            Ok(BackendResponse::new(status, format!("{{\"claimId\":{id}}}")))
        }),
        "[a-z]{1,10}".prop_map(|op| Err(TransportError::Timeout { operation: op })),
        ".{0,20}".prop_map(|m| Err(TransportError::Connection(m))),
        ".{0,20}".prop_map(|m| Err(TransportError::Other(m))),
    ]
}
