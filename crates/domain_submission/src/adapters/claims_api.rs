//! HTTP adapter for the claims backend
//!
//! Endpoints, relative to `base_url`:
//!
//! | call | request |
//! |---|---|
//! | submit claim | `POST /claims` with the core form as JSON |
//! | ancillary form | `POST /claims/{claim_id}/forms/{a,b}` with the sub-form as JSON |
//! | upload | `POST /claims/{claim_id}/documents?fileName=..&documentType=..` with the raw file |
//!
//! The auth context is attached as request headers on every call. Responses
//! are returned unparsed; the classifier decides what they mean.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use core_kernel::{DomainPort, PortError};

use crate::classifier::{BackendReply, BackendResponse, TransportError};
use crate::job::AncillaryForm;
use crate::payload::AuthContext;
use crate::ports::{ClaimsBackendPort, DocumentMetadata};
use crate::submission::BackendClaimId;

/// Connection settings for the claims backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsApiConfig {
    pub base_url: String,
    /// Whole-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ClaimsApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClaimsBackend {
    client: Client,
    base_url: Url,
}

impl HttpClaimsBackend {
    pub fn new(config: &ClaimsApiConfig) -> Result<Self, PortError> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| PortError::validation(format!("Invalid claims API URL: {e}")))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PortError::internal_from("Failed to build HTTP client", e))?;

        debug!(base_url = %base_url, timeout_ms = config.timeout_ms, "Claims API client created");
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn send(&self, operation: &str, request: RequestBuilder, auth: &AuthContext) -> BackendReply {
        let request = auth
            .headers()
            .fold(request, |request, (name, value)| request.header(name, value));

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(operation, &e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(operation, &e))?;

        debug!(operation, status, "Claims API responded");
        Ok(BackendResponse::new(status, body))
    }
}

/// Maps a reqwest failure onto the transport errors the classifier knows
///
/// Request and body errors happen after the request was built: the peer
/// refused, reset or closed the connection before a full response arrived.
/// They count as connection failures. Builder, redirect and decode errors
/// are not about the network and stay `Other`.
fn transport_error(operation: &str, e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            operation: operation.to_string(),
        }
    } else if e.is_connect() || e.is_request() || e.is_body() {
        TransportError::Connection(error_chain(e))
    } else {
        TransportError::Other(error_chain(e))
    }
}

/// The error and its sources, outermost first
fn error_chain(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn form_segment(form: AncillaryForm) -> &'static str {
    match form {
        AncillaryForm::A => "a",
        AncillaryForm::B => "b",
    }
}

impl DomainPort for HttpClaimsBackend {}

#[async_trait]
impl ClaimsBackendPort for HttpClaimsBackend {
    async fn submit_claim(&self, auth: &AuthContext, form: &Value) -> BackendReply {
        let request = self.client.post(self.url("/claims")).json(form);
        self.send("submit_claim", request, auth).await
    }

    async fn submit_ancillary_form(
        &self,
        auth: &AuthContext,
        claim_id: BackendClaimId,
        form: AncillaryForm,
        content: &Value,
    ) -> BackendReply {
        let path = format!("/claims/{claim_id}/forms/{}", form_segment(form));
        let request = self.client.post(self.url(&path)).json(content);
        self.send("submit_ancillary_form", request, auth).await
    }

    async fn upload(
        &self,
        auth: &AuthContext,
        file: Vec<u8>,
        metadata: &DocumentMetadata,
    ) -> BackendReply {
        let path = format!("/claims/{}/documents", metadata.claim_id);
        let request = self
            .client
            .post(self.url(&path))
            .query(&[
                ("fileName", metadata.file_name.as_str()),
                ("documentType", metadata.document_type.as_str()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(file);
        self.send("upload", request, auth).await
    }
}
