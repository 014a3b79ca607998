//! Report job lifecycle
//!
//! A [`ReportJob`] moves through an explicit state machine:
//!
//! ```text
//! Submitting ──accepted──▶ Polling ──DONE──▶ Resolved
//!     │                       │
//!     └──budget spent──▶ Failed ◀──budget spent / fatal──┘
//! ```
//!
//! The report and document ids live inside the states that own them, so a
//! resolved job always has a document id and a submitting job never has one.
//! Submission and polling each get a full, independent backoff budget.

use crate::api::ReportsApi;
use crate::config::RetryConfig;
use crate::error::{Error, ReportError};
use crate::retry::{IsRetryable, RetryError, retry_with_backoff};
use crate::types::{Event, ProcessingStatus, ReportRequest, Stage};
use tokio::sync::broadcast;

/// Failure message when report creation never succeeds
pub const SUBMIT_FAILED_MESSAGE: &str = "failed to obtain report id";

/// Failure message when polling never reaches DONE
pub const POLL_FAILED_MESSAGE: &str = "failed to obtain report status";

/// Failure message when a DONE report has no document id
pub const MISSING_DOCUMENT_MESSAGE: &str = "report document id not found";

/// Where a job is in its lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    /// The creation request has not succeeded yet
    Submitting,
    /// The report was accepted and is being generated
    Polling {
        /// Report id assigned by the API
        report_id: String,
    },
    /// The report is ready for download
    Resolved {
        /// Report id assigned by the API
        report_id: String,
        /// Document id to download
        document_id: String,
    },
    /// The job gave up
    Failed {
        /// Stage that failed
        stage: Stage,
        /// Message recorded in the job's result
        message: String,
    },
}

impl JobState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Resolved { .. } | JobState::Failed { .. })
    }
}

/// One report moving through its lifecycle
#[derive(Clone, Debug)]
pub struct ReportJob {
    request: ReportRequest,
    state: JobState,
}

impl ReportJob {
    /// A new job in the `Submitting` state
    pub fn new(request: ReportRequest) -> Self {
        Self {
            request,
            state: JobState::Submitting,
        }
    }

    /// The request this job serves
    pub fn request(&self) -> &ReportRequest {
        &self.request
    }

    /// Report name
    pub fn name(&self) -> &str {
        &self.request.name
    }

    /// Current state
    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Report id, once the creation request was accepted
    pub fn report_id(&self) -> Option<&str> {
        match &self.state {
            JobState::Polling { report_id } | JobState::Resolved { report_id, .. } => {
                Some(report_id)
            }
            JobState::Submitting | JobState::Failed { .. } => None,
        }
    }

    /// Document id, once the report is resolved
    pub fn document_id(&self) -> Option<&str> {
        match &self.state {
            JobState::Resolved { document_id, .. } => Some(document_id),
            _ => None,
        }
    }

    /// Consume the job, keeping its request and final state
    pub fn into_parts(self) -> (ReportRequest, JobState) {
        (self.request, self.state)
    }
}

/// Outcome of one status poll that did not resolve the report
#[derive(Debug, thiserror::Error)]
enum PollError {
    #[error(transparent)]
    Request(Error),

    #[error("report is {0}")]
    Pending(ProcessingStatus),

    #[error("report ended with status {0}")]
    Terminal(ProcessingStatus),

    #[error("report is DONE but has no reportDocumentId")]
    MissingDocumentId,
}

impl IsRetryable for PollError {
    fn is_retryable(&self) -> bool {
        match self {
            // Polling rides out transient failures of the status call itself
            PollError::Request(_) => true,
            PollError::Pending(_) => true,
            PollError::Terminal(_) | PollError::MissingDocumentId => false,
        }
    }
}

/// Drives report jobs from `Submitting` to `Resolved` or `Failed`
#[derive(Clone, Debug)]
pub struct ReportJobController {
    api: ReportsApi,
    retry: RetryConfig,
    fail_fast_on_terminal_status: bool,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl ReportJobController {
    /// Create a controller using `retry` as the budget for each stage
    pub fn new(api: ReportsApi, retry: RetryConfig) -> Self {
        Self {
            api,
            retry,
            fail_fast_on_terminal_status: false,
            event_tx: None,
        }
    }

    /// Stop polling as soon as the API reports `CANCELLED` or `FATAL`
    pub fn with_fail_fast_on_terminal_status(mut self, fail_fast: bool) -> Self {
        self.fail_fast_on_terminal_status = fail_fast;
        self
    }

    /// Publish lifecycle events on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Run the job until it reaches a terminal state
    pub async fn drive(&self, job: &mut ReportJob) {
        while !job.state.is_terminal() {
            self.step(job).await;
        }
    }

    /// Perform the single transition out of the current state
    ///
    /// Terminal states are left untouched.
    pub async fn step(&self, job: &mut ReportJob) {
        let next = match &job.state {
            JobState::Submitting => self.submit(&job.request).await,
            JobState::Polling { report_id } => self.poll(&job.request.name, report_id).await,
            JobState::Resolved { .. } | JobState::Failed { .. } => return,
        };
        job.state = next;
    }

    async fn submit(&self, request: &ReportRequest) -> JobState {
        let result = retry_with_backoff(&self.retry, Stage::Submit, || {
            self.api.create_report(&request.body)
        })
        .await;

        match result {
            Ok(report_id) => {
                tracing::info!(
                    report = %request.name,
                    report_id = %report_id,
                    "Report request accepted, waiting for generation"
                );
                self.emit(Event::ReportAccepted {
                    name: request.name.clone(),
                    report_id: report_id.clone(),
                });
                JobState::Polling { report_id }
            }
            Err(e) => {
                log_stage_failure(&request.name, Stage::Submit, &e);
                JobState::Failed {
                    stage: Stage::Submit,
                    message: SUBMIT_FAILED_MESSAGE.to_string(),
                }
            }
        }
    }

    async fn poll(&self, name: &str, report_id: &str) -> JobState {
        let started = tokio::time::Instant::now();

        let result = retry_with_backoff(&self.retry, Stage::Poll, || {
            let elapsed = started.elapsed();
            async move {
                let response = self
                    .api
                    .get_report(report_id)
                    .await
                    .map_err(PollError::Request)?;
                let status = response.processing_status;

                tracing::debug!(
                    report = %name,
                    report_id = %report_id,
                    status = %status,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Polled report status"
                );
                self.emit(Event::StatusPolled {
                    name: name.to_string(),
                    report_id: report_id.to_string(),
                    status,
                    elapsed,
                });

                match status {
                    ProcessingStatus::Done => response
                        .report_document_id
                        .filter(|id| !id.is_empty())
                        .ok_or(PollError::MissingDocumentId),
                    s if s.is_terminal() && self.fail_fast_on_terminal_status => {
                        Err(PollError::Terminal(s))
                    }
                    s => Err(PollError::Pending(s)),
                }
            }
        })
        .await;

        match result {
            Ok(document_id) => {
                tracing::info!(
                    report = %name,
                    report_id = %report_id,
                    document_id = %document_id,
                    "Report generated"
                );
                self.emit(Event::DocumentResolved {
                    name: name.to_string(),
                    document_id: document_id.clone(),
                });
                JobState::Resolved {
                    report_id: report_id.to_string(),
                    document_id,
                }
            }
            Err(RetryError::Permanent(PollError::MissingDocumentId)) => {
                tracing::error!(report = %name, report_id = %report_id, "DONE report has no document id");
                JobState::Failed {
                    stage: Stage::Poll,
                    message: MISSING_DOCUMENT_MESSAGE.to_string(),
                }
            }
            Err(RetryError::Permanent(PollError::Terminal(status))) => {
                let err = ReportError::TerminalStatus {
                    report_id: report_id.to_string(),
                    status,
                };
                tracing::error!(report = %name, error = %err, "Report will never complete");
                JobState::Failed {
                    stage: Stage::Poll,
                    message: POLL_FAILED_MESSAGE.to_string(),
                }
            }
            Err(e) => {
                log_stage_failure(name, Stage::Poll, &e);
                JobState::Failed {
                    stage: Stage::Poll,
                    message: POLL_FAILED_MESSAGE.to_string(),
                }
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }
}

fn log_stage_failure<E>(name: &str, stage: Stage, error: &RetryError<E>)
where
    E: std::fmt::Display + std::fmt::Debug,
{
    let error = match error {
        RetryError::BudgetExhausted {
            waited, attempts, ..
        } => ReportError::RetryBudgetExhausted {
            stage,
            waited: *waited,
            attempts: *attempts,
            last_error: error.last_error_message(),
        }
        .to_string(),
        RetryError::Permanent(e) => e.to_string(),
    };
    tracing::error!(report = %name, stage = %stage, error = %error, "Report job failed");
}
