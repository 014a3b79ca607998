//! Error types for sp-reports
//!
//! This module provides the error taxonomy for the report pipeline:
//! - Batch-wide failures that abort a whole run (configuration, authentication)
//! - Per-job failures ([`ReportError`]) that are normalized into a failed
//!   [`ReportResult`](crate::types::ReportResult) for that job only
//! - Transport-level failures used internally by the retry layer

use crate::types::{ProcessingStatus, Stage};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for sp-reports operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sp-reports
///
/// Only [`Error::Config`], [`Error::AuthenticationFailed`] and the batch
/// validation variants ever escape [`ReportPipeline::run`](crate::ReportPipeline::run).
/// Everything else is caught at the job boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "api_vc.client_id")
        key: Option<String>,
    },

    /// The access token could not be obtained; no report job can run
    #[error("authentication failed after waiting {:.1}s: {reason}", .waited.as_secs_f64())]
    AuthenticationFailed {
        /// Total time spent waiting between token exchange attempts
        waited: Duration,
        /// Description of the last failure
        reason: String,
    },

    /// Two requests in one batch share a name
    #[error("duplicate report name in batch: {0}")]
    DuplicateReportName(String),

    /// A request in the batch has an empty name
    #[error("report request names must not be empty")]
    EmptyReportName,

    /// The batch contains no requests
    #[error("report batch is empty")]
    EmptyBatch,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// An endpoint answered with an unexpected HTTP status
    #[error("{endpoint} returned HTTP {status}: {body}")]
    HttpStatus {
        /// Logical endpoint name (e.g., "token", "create report")
        endpoint: &'static str,
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// An endpoint answered successfully but the body lacked a required field
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse {
        /// Logical endpoint name
        endpoint: &'static str,
        /// What was wrong with the body
        reason: String,
    },
}

impl Error {
    /// Create a configuration error for a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Per-report errors
///
/// These never abort sibling jobs; the pipeline turns them into a failed
/// result for the report that raised them.
#[derive(Debug, Error)]
pub enum ReportError {
    /// A backoff-governed stage ran out of wait budget
    #[error(
        "{stage} retry budget exhausted after {:.1}s ({attempts} attempts): {last_error}",
        .waited.as_secs_f64()
    )]
    RetryBudgetExhausted {
        /// The stage that gave up
        stage: Stage,
        /// Total time spent waiting
        waited: Duration,
        /// Number of attempts made
        attempts: u32,
        /// Description of the last attempt's failure
        last_error: String,
    },

    /// The report reached a terminal processing state other than DONE
    #[error("report {report_id} ended with processing status {status}")]
    TerminalStatus {
        /// The report that ended
        report_id: String,
        /// The terminal status reported by the API
        status: ProcessingStatus,
    },

    /// The document id could not be turned into a download URL
    #[error("failed to resolve report document {document_id}: {reason}")]
    DocumentResolutionFailed {
        /// The document that could not be resolved
        document_id: String,
        /// Why resolution failed
        reason: String,
    },

    /// The document download failed
    #[error("failed to download report document: {reason}")]
    DownloadFailed {
        /// Why the download failed
        reason: String,
    },

    /// The document could not be decompressed or parsed
    #[error("failed to decode report document: {reason}")]
    DecodeFailed {
        /// Why decoding failed
        reason: String,
    },

    /// The document decoded but produced no tabular data
    #[error("processing report data failed or empty")]
    EmptyOrInvalidReportData,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_helper_sets_key() {
        let err = Error::config("missing client id", "api_vc.client_id");
        match &err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("api_vc.client_id")),
            other => panic!("expected Config error, got {other:?}"),
        }
        assert_eq!(err.to_string(), "configuration error: missing client id");
    }

    #[test]
    fn empty_report_message_is_stable() {
        assert_eq!(
            ReportError::EmptyOrInvalidReportData.to_string(),
            "processing report data failed or empty"
        );
    }

    #[test]
    fn budget_exhausted_display_includes_stage_and_wait() {
        let err = ReportError::RetryBudgetExhausted {
            stage: Stage::Poll,
            waited: Duration::from_secs(10),
            attempts: 3,
            last_error: "report is IN_PROGRESS".into(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("poll retry budget exhausted after 10.0s (3 attempts)"));
        assert!(msg.ends_with("report is IN_PROGRESS"));
    }
}
