//! Scripted Claims Backend
//!
//! A `ClaimsBackendPort` that replays scripted replies per call type and
//! records every call it receives. When a script runs out the fallback
//! reply for that call type is returned.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use core_kernel::DomainPort;
use domain_submission::{
    AncillaryForm, AuthContext, BackendClaimId, BackendReply, ClaimsBackendPort, DocumentMetadata,
};

use crate::fixtures::{ReplyFixtures, CLAIM_ID};

/// One call received by the scripted backend
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    SubmitClaim {
        form: Value,
    },
    AncillaryForm {
        claim_id: BackendClaimId,
        form: AncillaryForm,
    },
    Upload {
        metadata: DocumentMetadata,
        size: usize,
    },
}

#[derive(Debug)]
struct Script {
    replies: VecDeque<BackendReply>,
    fallback: BackendReply,
}

impl Script {
    fn new(fallback: BackendReply) -> Self {
        Self {
            replies: VecDeque::new(),
            fallback,
        }
    }

    fn next(&mut self) -> BackendReply {
        self.replies
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[derive(Debug)]
pub struct ScriptedBackend {
    claims: Mutex<Script>,
    forms: Mutex<Script>,
    uploads: Mutex<Script>,
    calls: Mutex<Vec<BackendCall>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// A backend that accepts everything, assigning [`CLAIM_ID`]
    pub fn new() -> Self {
        Self {
            claims: Mutex::new(Script::new(ReplyFixtures::claim_accepted(CLAIM_ID))),
            forms: Mutex::new(Script::new(ReplyFixtures::acknowledged())),
            uploads: Mutex::new(Script::new(ReplyFixtures::acknowledged())),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues replies for claim submissions, in order
    pub fn script_claims(self, replies: impl IntoIterator<Item = BackendReply>) -> Self {
        self.claims.lock().unwrap().replies.extend(replies);
        self
    }

    /// Reply for claim submissions once the script is used up
    pub fn claims_fallback(self, reply: BackendReply) -> Self {
        self.claims.lock().unwrap().fallback = reply;
        self
    }

    pub fn script_forms(self, replies: impl IntoIterator<Item = BackendReply>) -> Self {
        self.forms.lock().unwrap().replies.extend(replies);
        self
    }

    pub fn forms_fallback(self, reply: BackendReply) -> Self {
        self.forms.lock().unwrap().fallback = reply;
        self
    }

    pub fn script_uploads(self, replies: impl IntoIterator<Item = BackendReply>) -> Self {
        self.uploads.lock().unwrap().replies.extend(replies);
        self
    }

    pub fn uploads_fallback(self, reply: BackendReply) -> Self {
        self.uploads.lock().unwrap().fallback = reply;
        self
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn claim_submissions(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::SubmitClaim { .. }))
            .count()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl DomainPort for ScriptedBackend {}

#[async_trait]
impl ClaimsBackendPort for ScriptedBackend {
    async fn submit_claim(&self, _auth: &AuthContext, form: &Value) -> BackendReply {
        self.record(BackendCall::SubmitClaim { form: form.clone() });
        self.claims.lock().unwrap().next()
    }

    async fn submit_ancillary_form(
        &self,
        _auth: &AuthContext,
        claim_id: BackendClaimId,
        form: AncillaryForm,
        _content: &Value,
    ) -> BackendReply {
        self.record(BackendCall::AncillaryForm { claim_id, form });
        self.forms.lock().unwrap().next()
    }

    async fn upload(
        &self,
        _auth: &AuthContext,
        file: Vec<u8>,
        metadata: &DocumentMetadata,
    ) -> BackendReply {
        self.record(BackendCall::Upload {
            metadata: metadata.clone(),
            size: file.len(),
        });
        self.uploads.lock().unwrap().next()
    }
}
