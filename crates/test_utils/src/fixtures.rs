//! Pre-built Test Fixtures
//!
//! Provides ready-to-use payloads, auth contexts and canned backend replies.
//! These fixtures are designed to be consistent and predictable for unit tests.

use fake::faker::filesystem::en::FileName;
use fake::Fake;
use serde_json::{json, Value};
use uuid::Uuid;

use domain_submission::{
    AuthContext, BackendReply, BackendResponse, ClaimPayload, TransportError, UploadDescriptor,
};

/// The claim id used throughout the pipeline tests
pub const CLAIM_ID: i64 = 600_130_094;

/// Fixture for claim payloads
pub struct PayloadFixtures;

impl PayloadFixtures {
    /// A minimal core claim form
    pub fn core_form() -> Value {
        json!({
            "veteran": {
                "currentMailingAddress": {
                    "addressLine1": "1019 Robin Cir",
                    "city": "Portland",
                    "state": "OR",
                    "zipFirstFive": "97201"
                }
            },
            "disabilities": [
                { "name": "PTSD", "disabilityActionType": "NEW" }
            ]
        })
    }

    /// Payload with the core form only; fans out into nothing
    pub fn core_only() -> ClaimPayload {
        ClaimPayload::new(Self::core_form())
    }

    /// Ancillary sub-form A
    pub fn form_a() -> Value {
        json!({ "incidents": [{ "incidentDate": "2010-05-12", "location": "Kandahar" }] })
    }

    /// Ancillary sub-form B
    pub fn form_b() -> Value {
        json!({ "unemployability": { "lastWorkedFullTime": "2019-01-01" } })
    }

    /// An upload descriptor with a fresh confirmation code
    pub fn upload() -> UploadDescriptor {
        UploadDescriptor {
            confirmation_code: Uuid::new_v4().to_string(),
            name: FileName().fake(),
            attachment_id: "L451".to_string(),
        }
    }

    /// Core form plus `uploads` uploads and both sub-forms
    pub fn full(uploads: usize) -> ClaimPayload {
        (0..uploads)
            .fold(Self::core_only(), |payload, _| payload.with_upload(Self::upload()))
            .with_ancillary_form_a(Self::form_a())
            .with_ancillary_form_b(Self::form_b())
    }
}

/// Fixture for auth contexts
pub struct AuthFixtures;

impl AuthFixtures {
    pub fn user() -> AuthContext {
        AuthContext::from_iter([
            ("x-user-token", "token-abc123"),
            ("x-user-uuid", "b2fab2b5-6af0-45e1-a9e2-394347af91ef"),
        ])
    }
}

/// Canned replies of the claims backend
pub struct ReplyFixtures;

impl ReplyFixtures {
    /// 200 with a claim id body
    pub fn claim_accepted(claim_id: i64) -> BackendReply {
        Ok(BackendResponse::new(
            200,
            json!({ "claimId": claim_id }).to_string(),
        ))
    }

    /// 200 with an empty body, for uploads and sub-forms
    pub fn acknowledged() -> BackendReply {
        Ok(BackendResponse::new(200, "{}"))
    }

    /// A structured error reply carrying the given keys
    pub fn error_keys(status: u16, keys: &[&str]) -> BackendReply {
        let messages: Vec<Value> = keys
            .iter()
            .map(|key| json!({ "key": key, "severity": "FATAL", "text": format!("{key} rejected") }))
            .collect();
        Ok(BackendResponse::new(
            status,
            json!({ "messages": messages }).to_string(),
        ))
    }

    pub fn duplicate_claim() -> BackendReply {
        Self::error_keys(400, &["claim.submit.duplicateClaim"])
    }

    pub fn timeout() -> BackendReply {
        Err(TransportError::Timeout {
            operation: "submit_claim".to_string(),
        })
    }

    pub fn service_unavailable() -> BackendReply {
        Ok(BackendResponse::new(503, "<html>Service Unavailable</html>"))
    }

    pub fn malformed() -> BackendReply {
        Ok(BackendResponse::new(500, "not json"))
    }
}
