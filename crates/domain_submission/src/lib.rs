//! Claim Submission Domain
//!
//! This crate submits a claim to the claims backend asynchronously, tracks
//! every job of the submission, and fans out the dependent uploads and
//! sub-forms once the backend has assigned a claim id.
//!
//! # Submission Lifecycle
//!
//! ```text
//! create_submission -> primary job -> Success -> fan-out -> N ancillary jobs
//!                          |                                     |
//!                          v                                     v
//!          Retrying / NonRetryableError / Exhausted     batch join (all terminal)
//!                                                                |
//!                                                                v
//!                                                      Submission complete
//! ```
//!
//! A failed ancillary job still counts towards the join; only the primary
//! job gates the fan-out.

pub mod adapters;
pub mod classifier;
pub mod error;
pub mod fanout;
pub mod job;
pub mod payload;
pub mod ports;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod service;
pub mod status;
pub mod submission;
pub mod telemetry;

pub use classifier::{
    BackendReply, BackendResponse, ClassifiedError, ErrorClassifier, KnownError, KnownErrorTable,
    ResponseShape, TransportError,
};
pub use error::SubmissionError;
pub use fanout::{BatchCoordinator, FanOut};
pub use job::{AncillaryForm, JobEnvelope, JobKind, JobState, JobStatus, JobStatusUpdate, JobTask};
pub use payload::{AuthContext, ClaimPayload, UploadDescriptor};
pub use ports::{
    AttachmentPort, Batch, BatchPort, BatchProgress, ClaimsBackendPort, DocumentMetadata,
    BatchMember, JobQueuePort, JobSource, JobStatusPort, PipelinePorts, SubmissionPort,
};
pub use queue::{LocalQueue, WorkerConfig, WorkerPool};
pub use retry::{RetryPolicies, RetryPolicy};
pub use runner::{JobOutcome, JobRunner};
pub use service::{SubmissionReceipt, SubmissionService};
pub use status::{StatusDocument, StatusQuery};
pub use submission::{BackendClaimId, Submission};
