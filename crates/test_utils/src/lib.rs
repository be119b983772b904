//! Test Utilities Crate
//!
//! Provides shared test infrastructure, fixtures, and helpers for the
//! submission pipeline test suite.
//!
//! # Modules
//!
//! - `fixtures`: Payloads, auth contexts and canned backend replies
//! - `backend`: A scripted claims backend that records its calls
//! - `builders`: A fully wired in-memory pipeline
//! - `faults`: Port wrappers that fail chosen calls
//! - `database`: Database test helpers and container management
//! - `assertions`: Assertion helpers for job statuses
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod backend;
pub mod builders;
pub mod faults;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use backend::*;
pub use builders::*;
pub use faults::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
