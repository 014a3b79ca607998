//! Core types and events

use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Message recorded on every successful report
pub const SUCCESS_MESSAGE: &str = "report fetched successfully";

/// One named report to retrieve
///
/// The body is passed to the report-creation endpoint untouched; its
/// contents (report type, options, marketplaces, time range) are the
/// caller's business.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    /// Name of the report, unique within a batch
    pub name: String,

    /// Opaque report-creation payload
    pub body: serde_json::Value,

    /// Dotted path to the array inside the document that should become the
    /// table rows (e.g. `salesByAsin`). The whole document is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_path: Option<String>,
}

impl ReportRequest {
    /// Create a request from a name and a creation payload
    pub fn new(name: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            body,
            record_path: None,
        }
    }

    /// Tabulate only the array found at `path` inside the document
    pub fn with_record_path(mut self, path: impl Into<String>) -> Self {
        self.record_path = Some(path.into());
        self
    }
}

/// A batch of report requests
///
/// A single request converts into a one-element batch. When deserialized,
/// either one request object or a list of them is accepted.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReportBatch(Vec<ReportRequest>);

impl ReportBatch {
    /// Number of requests in the batch
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the batch has no requests
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the requests
    pub fn iter(&self) -> std::slice::Iter<'_, ReportRequest> {
        self.0.iter()
    }

    /// Take the requests out of the batch
    pub fn into_requests(self) -> Vec<ReportRequest> {
        self.0
    }
}

impl From<ReportRequest> for ReportBatch {
    fn from(request: ReportRequest) -> Self {
        Self(vec![request])
    }
}

impl From<Vec<ReportRequest>> for ReportBatch {
    fn from(requests: Vec<ReportRequest>) -> Self {
        Self(requests)
    }
}

impl FromIterator<ReportRequest> for ReportBatch {
    fn from_iter<I: IntoIterator<Item = ReportRequest>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ReportBatch {
    type Item = ReportRequest;
    type IntoIter = std::vec::IntoIter<ReportRequest>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'de> Deserialize<'de> for ReportBatch {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(ReportRequest),
            Many(Vec<ReportRequest>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(request) => Self(vec![request]),
            OneOrMany::Many(requests) => Self(requests),
        })
    }
}

/// Short-lived access token shared read-only by every job in a run
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token value, for the `x-amz-access-token` header
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Processing state of a report as reported by the API
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    /// Waiting to be processed
    InQueue,
    /// Being generated
    InProgress,
    /// Finished; a document is available
    Done,
    /// Cancelled before completion
    Cancelled,
    /// Generation failed
    Fatal,
    /// Any state this crate does not know about
    #[serde(other)]
    Unknown,
}

impl ProcessingStatus {
    /// Whether the API will never move the report out of this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Done | ProcessingStatus::Cancelled | ProcessingStatus::Fatal
        )
    }

    /// The wire name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::InQueue => "IN_QUEUE",
            ProcessingStatus::InProgress => "IN_PROGRESS",
            ProcessingStatus::Done => "DONE",
            ProcessingStatus::Cancelled => "CANCELLED",
            ProcessingStatus::Fatal => "FATAL",
            ProcessingStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage, used to label retries, logs and errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Token exchange
    Authenticate,
    /// Report creation request
    Submit,
    /// Report status polling
    Poll,
    /// Document resolution, download and decoding
    Fetch,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Authenticate => "authenticate",
            Stage::Submit => "submit",
            Stage::Poll => "poll",
            Stage::Fetch => "fetch",
        })
    }
}

/// Outcome of a single report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// The report was retrieved and produced data
    Success,
    /// The report could not be retrieved or produced no data
    Failed,
}

/// Result for one named report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportResult {
    /// Tabular report data, present only on success
    pub data: Option<Table>,
    /// Success or failure
    pub status: ReportStatus,
    /// Human-readable outcome description
    pub message: String,
}

impl ReportResult {
    /// A successful result carrying `data`
    pub fn success(data: Table) -> Self {
        Self {
            data: Some(data),
            status: ReportStatus::Success,
            message: SUCCESS_MESSAGE.to_string(),
        }
    }

    /// A failed result with no data
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            data: None,
            status: ReportStatus::Failed,
            message: message.into(),
        }
    }

    /// Whether the report succeeded
    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
    }
}

/// Aggregate result of a pipeline run
///
/// Holds exactly one entry per requested report name. `all_success` is
/// derived from the entries and cannot disagree with them.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PipelineResult {
    results: HashMap<String, ReportResult>,
    all_success: bool,
}

impl PipelineResult {
    /// Build the aggregate from per-report results
    pub fn from_results(results: HashMap<String, ReportResult>) -> Self {
        let all_success = results.values().all(ReportResult::is_success);
        Self {
            results,
            all_success,
        }
    }

    /// Results keyed by report name
    pub fn results(&self) -> &HashMap<String, ReportResult> {
        &self.results
    }

    /// Result for one report
    pub fn get(&self, name: &str) -> Option<&ReportResult> {
        self.results.get(name)
    }

    /// Whether every report succeeded
    pub fn all_success(&self) -> bool {
        self.all_success
    }

    /// Number of reports in the run
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the run had no reports
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Names of the reports that failed
    pub fn failed_names(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|(_, result)| !result.is_success())
            .map(|(name, _)| name.as_str())
    }

    /// Split into `(results, all_success)`
    pub fn into_parts(self) -> (HashMap<String, ReportResult>, bool) {
        (self.results, self.all_success)
    }
}

/// Events emitted by the pipeline
///
/// Subscribe with [`ReportPipeline::subscribe`](crate::ReportPipeline::subscribe).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A job was picked up by a worker
    JobStarted {
        /// Report name
        name: String,
    },

    /// The creation request was accepted
    ReportAccepted {
        /// Report name
        name: String,
        /// Report id assigned by the API
        report_id: String,
    },

    /// A status poll returned
    StatusPolled {
        /// Report name
        name: String,
        /// Report id
        report_id: String,
        /// State reported by the API
        status: ProcessingStatus,
        /// Time since polling started
        #[serde(with = "duration_secs")]
        elapsed: Duration,
    },

    /// The report finished and its document id is known
    DocumentResolved {
        /// Report name
        name: String,
        /// Document id
        document_id: String,
    },

    /// The report was downloaded and tabulated
    ReportCompleted {
        /// Report name
        name: String,
        /// Number of table rows
        rows: usize,
    },

    /// The report failed
    ReportFailed {
        /// Report name
        name: String,
        /// Failure message recorded in the result
        message: String,
    },

    /// Every job in the batch finished
    BatchCompleted {
        /// Number of reports in the batch
        total: usize,
        /// Number of failed reports
        failed: usize,
        /// Whether every report succeeded
        all_success: bool,
    },
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
