//! Claim payload and authentication context
//!
//! A payload is the core claim form plus the optional pieces that turn into
//! ancillary jobs once the core form has been accepted by the backend.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::{AncillaryForm, JobTask};

/// Describes one supporting-evidence file attached to a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDescriptor {
    /// Attachment guid handed out when the file was uploaded
    pub confirmation_code: String,
    /// Original file name
    pub name: String,
    /// Backend document type code (e.g. "L451")
    pub attachment_id: String,
}

/// The full claim submitted by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimPayload {
    /// The primary claim form sent on the first backend call
    pub core_form: Value,
    /// Dependent sub-form A, submitted after the claim is established
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancillary_form_a: Option<Value>,
    /// Dependent sub-form B, submitted after the claim is established
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancillary_form_b: Option<Value>,
    /// Supporting evidence uploads
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploads: Vec<UploadDescriptor>,
}

impl ClaimPayload {
    /// Creates a payload with only the core form
    pub fn new(core_form: Value) -> Self {
        Self {
            core_form,
            ancillary_form_a: None,
            ancillary_form_b: None,
            uploads: Vec::new(),
        }
    }

    pub fn with_ancillary_form_a(mut self, form: Value) -> Self {
        self.ancillary_form_a = Some(form);
        self
    }

    pub fn with_ancillary_form_b(mut self, form: Value) -> Self {
        self.ancillary_form_b = Some(form);
        self
    }

    pub fn with_upload(mut self, upload: UploadDescriptor) -> Self {
        self.uploads.push(upload);
        self
    }

    /// Returns the requested ancillary sub-form, if the user supplied one
    pub fn ancillary_form(&self, form: AncillaryForm) -> Option<&Value> {
        match form {
            AncillaryForm::A => self.ancillary_form_a.as_ref(),
            AncillaryForm::B => self.ancillary_form_b.as_ref(),
        }
    }

    /// Lists the ancillary tasks this payload fans out into
    ///
    /// One task per upload, then one per present sub-form.
    pub fn ancillary_tasks(&self) -> Vec<JobTask> {
        let mut tasks: Vec<JobTask> = self
            .uploads
            .iter()
            .cloned()
            .map(JobTask::Upload)
            .collect();
        if self.ancillary_form_a.is_some() {
            tasks.push(JobTask::AncillaryForm(AncillaryForm::A));
        }
        if self.ancillary_form_b.is_some() {
            tasks.push(JobTask::AncillaryForm(AncillaryForm::B));
        }
        tasks
    }
}

/// Opaque credential bundle needed to call the backend on the user's behalf
///
/// The values are sent as request headers and are never inspected. `Debug`
/// is redacted so the context cannot leak through logs.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthContext(BTreeMap<String, String>);

impl AuthContext {
    pub fn new(headers: BTreeMap<String, String>) -> Self {
        Self(headers)
    }

    /// Header name/value pairs to attach to backend requests
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AuthContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthContext([REDACTED; {} headers])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upload(code: &str) -> UploadDescriptor {
        UploadDescriptor {
            confirmation_code: code.to_string(),
            name: format!("{code}.pdf"),
            attachment_id: "L451".to_string(),
        }
    }

    #[test]
    fn test_core_only_payload_has_no_ancillary_tasks() {
        let payload = ClaimPayload::new(json!({"veteran": {}}));
        assert!(payload.ancillary_tasks().is_empty());
    }

    #[test]
    fn test_ancillary_tasks_cover_uploads_and_forms() {
        let payload = ClaimPayload::new(json!({}))
            .with_upload(upload("a"))
            .with_upload(upload("b"))
            .with_ancillary_form_b(json!({"incident": 1}));

        let tasks = payload.ancillary_tasks();
        assert_eq!(tasks.len(), 3);
        assert!(matches!(tasks[2], JobTask::AncillaryForm(AncillaryForm::B)));
    }

    #[test]
    fn test_payload_deserializes_without_optional_parts() {
        let payload: ClaimPayload = serde_json::from_value(json!({"coreForm": {"x": 1}})).unwrap();
        assert_eq!(payload.ancillary_form(AncillaryForm::A), None);
        assert!(payload.uploads.is_empty());
    }

    #[test]
    fn test_auth_context_debug_is_redacted() {
        let auth: AuthContext = [("x-user-token", "796043735")].into_iter().collect();
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("796043735"));
        assert!(rendered.contains("REDACTED"));
    }
}
