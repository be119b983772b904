//! Submission aggregate

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use core_kernel::{SavedClaimId, SubmissionId, UserId};

use crate::error::SubmissionError;
use crate::job::AncillaryForm;
use crate::payload::{AuthContext, ClaimPayload};

/// Claim id assigned by the backend once the core form is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendClaimId(i64);

impl BackendClaimId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for BackendClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for BackendClaimId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// One claim submission
///
/// Two fields change after creation, each at most once:
/// `backend_claim_id` (set by the primary job) and `complete` (set by the
/// batch join).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    /// Owning user
    pub user_id: UserId,
    /// Saved claim this submission was created from
    pub saved_claim_id: SavedClaimId,
    pub payload: ClaimPayload,
    pub auth_context: AuthContext,
    pub backend_claim_id: Option<BackendClaimId>,
    pub complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(
        user_id: UserId,
        saved_claim_id: SavedClaimId,
        payload: ClaimPayload,
        auth_context: AuthContext,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SubmissionId::new_v7(),
            user_id,
            saved_claim_id,
            payload,
            auth_context,
            backend_claim_id: None,
            complete: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records the backend claim id
    ///
    /// Setting the same id again is a no-op (returns `Ok(false)`); a different
    /// id is rejected.
    pub fn record_backend_claim_id(&mut self, claim_id: BackendClaimId) -> Result<bool, SubmissionError> {
        match self.backend_claim_id {
            Some(existing) if existing == claim_id => Ok(false),
            Some(existing) => Err(SubmissionError::ConflictingClaimId {
                submission_id: self.id,
                existing,
                attempted: claim_id,
            }),
            None => {
                self.backend_claim_id = Some(claim_id);
                self.updated_at = Utc::now();
                Ok(true)
            }
        }
    }

    /// Flips `complete` to true; returns whether this call made the transition
    pub fn mark_complete(&mut self) -> bool {
        if self.complete {
            return false;
        }
        self.complete = true;
        self.updated_at = Utc::now();
        true
    }

    pub fn core_form(&self) -> &Value {
        &self.payload.core_form
    }

    pub fn ancillary_form(&self, form: AncillaryForm) -> Option<&Value> {
        self.payload.ancillary_form(form)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission() -> Submission {
        Submission::new(
            UserId::new(),
            SavedClaimId::new(),
            ClaimPayload::new(json!({"disabilities": []})),
            AuthContext::default(),
        )
    }

    #[test]
    fn test_new_submission_is_incomplete_without_claim_id() {
        let s = submission();
        assert!(!s.complete);
        assert_eq!(s.backend_claim_id, None);
    }

    #[test]
    fn test_record_claim_id_is_idempotent() {
        let mut s = submission();
        assert!(s.record_backend_claim_id(BackendClaimId::new(600130094)).unwrap());
        assert!(!s.record_backend_claim_id(BackendClaimId::new(600130094)).unwrap());
        assert_eq!(s.backend_claim_id, Some(BackendClaimId::new(600130094)));
    }

    #[test]
    fn test_record_different_claim_id_is_rejected() {
        let mut s = submission();
        s.record_backend_claim_id(BackendClaimId::new(1)).unwrap();
        let err = s.record_backend_claim_id(BackendClaimId::new(2)).unwrap_err();
        assert!(matches!(err, SubmissionError::ConflictingClaimId { .. }));
    }

    #[test]
    fn test_mark_complete_only_transitions_once() {
        let mut s = submission();
        assert!(s.mark_complete());
        assert!(!s.mark_complete());
        assert!(s.complete);
    }
}
