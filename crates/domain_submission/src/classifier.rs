//! Backend outcome classification
//!
//! Every backend call ends in exactly one [`ClassifiedError`]. The classifier
//! is pure: it looks at the raw reply and an immutable [`KnownErrorTable`]
//! and never decides whether to retry. That decision belongs to the job
//! runner and its [`RetryPolicy`](crate::retry::RetryPolicy).
//!
//! Rules, in priority order:
//!
//! 1. Transport timeout or connection failure: retryable ("gateway timeout").
//!    Any other transport failure is non-retryable (`unexpected_error`).
//! 2. Structured error entries: looked up in the known-error table. An
//!    unmapped key is non-retryable (`unmapped_backend_error`); a transient
//!    known key makes the reply retryable; otherwise the first entry's code
//!    is reported as non-retryable.
//! 3. Non-2xx without entries: 502/503/504 are retryable, everything else is
//!    non-retryable (`unexpected_response_body`).
//! 4. 2xx: success, carrying the claim id when one is expected.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::submission::BackendClaimId;

pub const GATEWAY_TIMEOUT: &str = "gateway timeout";
pub const BACKEND_UNAVAILABLE: &str = "backend unavailable";
pub const UNEXPECTED_RESPONSE_BODY: &str = "unexpected_response_body";
pub const UNMAPPED_BACKEND_ERROR: &str = "unmapped_backend_error";
pub const UNEXPECTED_ERROR: &str = "unexpected_error";

/// Raw HTTP-level reply from the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: u16,
    pub body: String,
}

impl BackendResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure before any response was received
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Timed out calling {operation}")]
    Timeout { operation: String },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Unexpected failure: {0}")]
    Other(String),
}

/// What a backend call returned, before classification
pub type BackendReply = Result<BackendResponse, TransportError>;

/// What a 2xx body must contain for the call to count as a success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Claim submission: the body must carry the new claim id
    ClaimId,
    /// Uploads and sub-forms: any 2xx is enough
    Acknowledgement,
}

/// Result of classifying one backend call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClassifiedError {
    Success { claim_id: Option<BackendClaimId> },
    RetryableError { reason: String },
    NonRetryableError { code: String, message: String },
}

impl ClassifiedError {
    fn retryable(reason: impl Into<String>) -> Self {
        ClassifiedError::RetryableError {
            reason: reason.into(),
        }
    }

    fn non_retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        ClassifiedError::NonRetryableError {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// One `(key, severity, text)` entry of a structured backend error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendErrorEntry {
    pub key: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    messages: Vec<BackendErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ClaimBody {
    #[serde(rename = "claimId")]
    claim_id: i64,
}

/// Whether a known backend error can be resolved by retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDisposition {
    /// A business-rule rejection; retrying cannot help
    Terminal,
    /// A backend-side condition expected to clear
    Transient,
}

/// Table entry for one backend error key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownError {
    pub key: String,
    pub code: String,
    pub disposition: ErrorDisposition,
}

impl KnownError {
    pub fn terminal(key: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            code: code.into(),
            disposition: ErrorDisposition::Terminal,
        }
    }

    pub fn transient(key: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            code: code.into(),
            disposition: ErrorDisposition::Transient,
        }
    }
}

/// Immutable lookup of known backend error keys
///
/// Built once at startup and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct KnownErrorTable {
    entries: HashMap<String, KnownError>,
}

impl KnownErrorTable {
    pub fn from_entries(entries: impl IntoIterator<Item = KnownError>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.key.clone(), e)).collect(),
        }
    }

    /// The errors the claims backend is known to return
    pub fn standard() -> Self {
        Self::from_entries([
            KnownError::terminal("claim.submit.duplicateClaim", "duplicate_claim"),
            KnownError::terminal("claim.submit.save.draftForm.maxEpCode", "max_ep_code"),
            KnownError::terminal("claim.submit.save.draftForm.pifInUse", "pif_in_use"),
            KnownError::terminal("claim.submit.establishClaim.serviceError", "establish_claim_failed"),
            KnownError::terminal(
                "claim.serviceInformation.confinementPastActiveDutyDate",
                "confinement_past_active_duty",
            ),
            KnownError::terminal(
                "claim.serviceInformation.confinementWithinServicePeriod",
                "confinement_outside_service_period",
            ),
            KnownError::terminal("claim.validation.pattern", "invalid_field_format"),
            KnownError::transient("claim.submit.backendBusy", "backend_busy"),
        ])
    }

    /// Returns a copy of this table with `extra` added, replacing same-key entries
    pub fn extended(&self, extra: impl IntoIterator<Item = KnownError>) -> Self {
        let mut entries = self.entries.clone();
        entries.extend(extra.into_iter().map(|e| (e.key.clone(), e)));
        Self { entries }
    }

    pub fn lookup(&self, key: &str) -> Option<&KnownError> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps raw backend replies onto [`ClassifiedError`]
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    table: Arc<KnownErrorTable>,
}

impl ErrorClassifier {
    pub fn new(table: Arc<KnownErrorTable>) -> Self {
        Self { table }
    }

    pub fn classify(&self, reply: &BackendReply, shape: ResponseShape) -> ClassifiedError {
        let response = match reply {
            Ok(response) => response,
            Err(TransportError::Timeout { .. }) | Err(TransportError::Connection(_)) => {
                return ClassifiedError::retryable(GATEWAY_TIMEOUT);
            }
            Err(TransportError::Other(message)) => {
                return ClassifiedError::non_retryable(UNEXPECTED_ERROR, message.clone());
            }
        };

        if response.is_success() {
            return classify_success(response, shape);
        }

        let entries = serde_json::from_str::<ErrorBody>(&response.body)
            .map(|body| body.messages)
            .unwrap_or_default();
        if !entries.is_empty() {
            return self.classify_entries(&entries);
        }

        match response.status {
            502..=504 => ClassifiedError::retryable(BACKEND_UNAVAILABLE),
            status => ClassifiedError::non_retryable(
                UNEXPECTED_RESPONSE_BODY,
                format!("backend returned {status} without a recognizable error body"),
            ),
        }
    }

    fn classify_entries(&self, entries: &[BackendErrorEntry]) -> ClassifiedError {
        if let Some(unmapped) = entries.iter().find(|e| self.table.lookup(&e.key).is_none()) {
            return ClassifiedError::non_retryable(
                UNMAPPED_BACKEND_ERROR,
                format!("{}: {}", unmapped.key, unmapped.text),
            );
        }

        let known: Vec<(&BackendErrorEntry, &KnownError)> = entries
            .iter()
            .filter_map(|e| self.table.lookup(&e.key).map(|k| (e, k)))
            .collect();

        if let Some((_, transient)) = known
            .iter()
            .find(|(_, k)| k.disposition == ErrorDisposition::Transient)
        {
            return ClassifiedError::retryable(transient.code.clone());
        }

        let (entry, first) = known[0];
        ClassifiedError::non_retryable(first.code.clone(), entry.text.clone())
    }
}

fn classify_success(response: &BackendResponse, shape: ResponseShape) -> ClassifiedError {
    match shape {
        ResponseShape::Acknowledgement => ClassifiedError::Success { claim_id: None },
        ResponseShape::ClaimId => match serde_json::from_str::<ClaimBody>(&response.body) {
            Ok(body) => ClassifiedError::Success {
                claim_id: Some(BackendClaimId::new(body.claim_id)),
            },
            Err(e) => ClassifiedError::non_retryable(
                UNEXPECTED_RESPONSE_BODY,
                format!("claim submission response has no claim id: {e}"),
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new(Arc::new(KnownErrorTable::standard()))
    }

    fn error_reply(status: u16, keys: &[&str]) -> BackendReply {
        let messages: Vec<_> = keys
            .iter()
            .map(|k| json!({"key": k, "severity": "ERROR", "text": format!("text for {k}")}))
            .collect();
        Ok(BackendResponse::new(status, json!({ "messages": messages }).to_string()))
    }

    #[test]
    fn test_timeout_is_retryable_gateway_timeout() {
        let reply: BackendReply = Err(TransportError::Timeout {
            operation: "submit_claim".to_string(),
        });
        assert_eq!(
            classifier().classify(&reply, ResponseShape::ClaimId),
            ClassifiedError::retryable(GATEWAY_TIMEOUT)
        );
    }

    #[test]
    fn test_connection_failure_is_retryable() {
        let reply: BackendReply = Err(TransportError::Connection("refused".to_string()));
        assert!(matches!(
            classifier().classify(&reply, ResponseShape::Acknowledgement),
            ClassifiedError::RetryableError { .. }
        ));
    }

    #[test]
    fn test_other_transport_failure_is_non_retryable() {
        let reply: BackendReply = Err(TransportError::Other("foo".to_string()));
        assert_eq!(
            classifier().classify(&reply, ResponseShape::ClaimId),
            ClassifiedError::non_retryable(UNEXPECTED_ERROR, "foo")
        );
    }

    #[test]
    fn test_known_terminal_keys_report_first_code() {
        let reply = error_reply(
            400,
            &[
                "claim.serviceInformation.confinementPastActiveDutyDate",
                "claim.validation.pattern",
            ],
        );
        match classifier().classify(&reply, ResponseShape::ClaimId) {
            ClassifiedError::NonRetryableError { code, message } => {
                assert_eq!(code, "confinement_past_active_duty");
                assert!(message.contains("confinementPastActiveDutyDate"));
            }
            other => panic!("expected non-retryable, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_claim_is_non_retryable() {
        let reply = error_reply(500, &["claim.submit.duplicateClaim"]);
        assert!(matches!(
            classifier().classify(&reply, ResponseShape::ClaimId),
            ClassifiedError::NonRetryableError { code, .. } if code == "duplicate_claim"
        ));
    }

    #[test]
    fn test_unmapped_key_is_non_retryable_even_next_to_transient() {
        let reply = error_reply(500, &["claim.submit.backendBusy", "claim.submit.somethingNew"]);
        assert!(matches!(
            classifier().classify(&reply, ResponseShape::ClaimId),
            ClassifiedError::NonRetryableError { code, .. } if code == UNMAPPED_BACKEND_ERROR
        ));
    }

    #[test]
    fn test_transient_known_key_is_retryable() {
        let reply = error_reply(500, &["claim.submit.backendBusy"]);
        assert_eq!(
            classifier().classify(&reply, ResponseShape::ClaimId),
            ClassifiedError::retryable("backend_busy")
        );
    }

    #[test]
    fn test_malformed_error_body_is_non_retryable() {
        let reply: BackendReply = Ok(BackendResponse::new(400, "<html>bad gateway</html>"));
        assert!(matches!(
            classifier().classify(&reply, ResponseShape::ClaimId),
            ClassifiedError::NonRetryableError { code, .. } if code == UNEXPECTED_RESPONSE_BODY
        ));
    }

    #[test]
    fn test_gateway_statuses_without_body_are_retryable() {
        for status in [502, 503, 504] {
            let reply: BackendReply = Ok(BackendResponse::new(status, ""));
            assert_eq!(
                classifier().classify(&reply, ResponseShape::ClaimId),
                ClassifiedError::retryable(BACKEND_UNAVAILABLE)
            );
        }
    }

    #[test]
    fn test_success_carries_claim_id() {
        let reply: BackendReply = Ok(BackendResponse::new(200, r#"{"claimId": 600130094}"#));
        assert_eq!(
            classifier().classify(&reply, ResponseShape::ClaimId),
            ClassifiedError::Success {
                claim_id: Some(BackendClaimId::new(600130094))
            }
        );
    }

    #[test]
    fn test_success_without_claim_id_is_unexpected_body() {
        let reply: BackendReply = Ok(BackendResponse::new(200, r#"{"status": "ok"}"#));
        assert!(matches!(
            classifier().classify(&reply, ResponseShape::ClaimId),
            ClassifiedError::NonRetryableError { code, .. } if code == UNEXPECTED_RESPONSE_BODY
        ));
    }

    #[test]
    fn test_acknowledgement_needs_no_body() {
        let reply: BackendReply = Ok(BackendResponse::new(202, ""));
        assert_eq!(
            classifier().classify(&reply, ResponseShape::Acknowledgement),
            ClassifiedError::Success { claim_id: None }
        );
    }

    #[test]
    fn test_extended_table_overrides_entries() {
        let table = KnownErrorTable::standard()
            .extended([KnownError::transient("claim.submit.duplicateClaim", "retry_dup")]);
        let classifier = ErrorClassifier::new(Arc::new(table));
        let reply = error_reply(500, &["claim.submit.duplicateClaim"]);
        assert_eq!(
            classifier.classify(&reply, ResponseShape::ClaimId),
            ClassifiedError::retryable("retry_dup")
        );
    }
}
