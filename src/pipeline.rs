//! Batch orchestration
//!
//! [`ReportPipeline`] acquires one access token, fans the batch out over a
//! bounded pool of worker tasks and collects one [`ReportResult`] per
//! report name. Only configuration and authentication failures abort a run;
//! everything that goes wrong inside a job becomes that job's failed result.

use crate::api::ReportsApi;
use crate::auth::TokenProvider;
use crate::config::Config;
use crate::error::{Error, ReportError, Result};
use crate::fetcher::ReportFetcher;
use crate::job::{JobState, ReportJob, ReportJobController};
use crate::types::{Event, PipelineResult, ReportBatch, ReportRequest, ReportResult};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Prefix of the message recorded when a job dies unexpectedly
pub const UNEXPECTED_FAILURE_PREFIX: &str = "error while processing report";

const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Everything a worker needs, shared read-only across the batch
struct JobContext {
    controller: ReportJobController,
    fetcher: ReportFetcher,
    event_tx: broadcast::Sender<Event>,
}

impl JobContext {
    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Retrieves batches of reports
///
/// ```no_run
/// use serde_json::json;
/// use sp_reports::{Config, Credentials, ReportPipeline, ReportRequest};
///
/// # async fn run() -> sp_reports::Result<()> {
/// let config = Config::new(Credentials::new("id", "secret", "Atzr|refresh"));
/// let pipeline = ReportPipeline::new(config)?;
/// let result = pipeline
///     .run(ReportRequest::new(
///         "daily_sales",
///         json!({"reportType": "GET_VENDOR_SALES_REPORT"}),
///     ))
///     .await?;
/// println!("all reports fetched: {}", result.all_success());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ReportPipeline {
    config: Arc<Config>,
    client: reqwest::Client,
    event_tx: broadcast::Sender<Event>,
}

impl ReportPipeline {
    /// Create a pipeline from a validated configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        // Connect timeout only; API calls and downloads bound themselves
        let client = reqwest::Client::builder()
            .connect_timeout(config.endpoints.request_timeout)
            .build()?;
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            client,
            event_tx,
        })
    }

    /// Load the configuration file at `path` and create a pipeline from it
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Config::from_file(path)?)
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to pipeline events
    ///
    /// Events published before subscribing are not replayed. A receiver that
    /// falls more than the channel capacity behind sees `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Retrieve every report in `batch` using the configured budget and
    /// worker count
    pub async fn run(&self, batch: impl Into<ReportBatch>) -> Result<PipelineResult> {
        self.run_with(
            batch,
            self.config.retry.max_wait,
            self.config.pipeline.max_workers,
        )
        .await
    }

    /// Retrieve every report in `batch` with an explicit per-stage wait
    /// budget and worker count
    pub async fn run_with(
        &self,
        batch: impl Into<ReportBatch>,
        max_wait: Duration,
        max_workers: usize,
    ) -> Result<PipelineResult> {
        let batch = batch.into();
        validate_batch(&batch)?;
        if max_workers == 0 {
            return Err(Error::config(
                "max_workers must be at least 1",
                "pipeline.max_workers",
            ));
        }

        let mut retry = self.config.retry.clone();
        retry.max_wait = max_wait;
        let request_timeout = self.config.endpoints.request_timeout;

        let token = TokenProvider::new(self.client.clone(), &self.config.endpoints.token_url)
            .with_request_timeout(request_timeout)
            .with_malformed_response_fatal(self.config.pipeline.malformed_token_is_fatal)
            .acquire_token(&self.config.credentials, &retry)
            .await?;

        let api = ReportsApi::new(self.client.clone(), &self.config.endpoints.api_base_url, token)?
            .with_request_timeout(request_timeout);
        let controller = ReportJobController::new(api.clone(), retry)
            .with_fail_fast_on_terminal_status(self.config.pipeline.fail_fast_on_terminal_status)
            .with_events(self.event_tx.clone());
        let ctx = Arc::new(JobContext {
            controller,
            fetcher: ReportFetcher::new(api, self.client.clone())
                .with_idle_timeout(request_timeout),
            event_tx: self.event_tx.clone(),
        });

        let total = batch.len();
        tracing::info!(
            reports = total,
            max_workers,
            max_wait_secs = max_wait.as_secs_f64(),
            "Starting report batch"
        );

        let outcomes = fan_out(batch, max_workers, &self.event_tx, |request| {
            process(Arc::clone(&ctx), request)
        })
        .await;

        let result = PipelineResult::from_results(outcomes.into_iter().collect());
        let failed = result.failed_names().count();
        if failed > 0 {
            tracing::warn!(reports = total, failed, "Report batch finished with failures");
        } else {
            tracing::info!(reports = total, "Report batch finished");
        }
        ctx.emit(Event::BatchCompleted {
            total,
            failed,
            all_success: result.all_success(),
        });

        Ok(result)
    }
}

/// Run `job` for every request on at most `max_workers` tasks at once
///
/// A job whose task dies is recorded as failed; its siblings keep running.
async fn fan_out<F, Fut>(
    batch: ReportBatch,
    max_workers: usize,
    event_tx: &broadcast::Sender<Event>,
    job: F,
) -> Vec<(String, ReportResult)>
where
    F: Fn(ReportRequest) -> Fut,
    Fut: Future<Output = ReportResult> + Send + 'static,
{
    // Spawning happens lazily inside the stream, so at most
    // `max_workers` tasks exist at any time
    stream::iter(batch)
        .map(|request| {
            let name = request.name.clone();
            let event_tx = event_tx.clone();
            let handle = tokio::spawn(job(request));
            async move {
                let result = handle.await.unwrap_or_else(|e| {
                    let message = format!("{UNEXPECTED_FAILURE_PREFIX}: {}", describe_join_error(e));
                    tracing::error!(report = %name, error = %message, "Report job died");
                    event_tx
                        .send(Event::ReportFailed {
                            name: name.clone(),
                            message: message.clone(),
                        })
                        .ok();
                    ReportResult::failed(message)
                });
                (name, result)
            }
        })
        .buffer_unordered(max_workers)
        .collect()
        .await
}

fn describe_join_error(error: tokio::task::JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let panic = error.into_panic();
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "job panicked".to_string()
    }
}

/// Run one report from submission to result
async fn process(ctx: Arc<JobContext>, request: ReportRequest) -> ReportResult {
    let name = request.name.clone();
    ctx.emit(Event::JobStarted { name: name.clone() });

    let mut job = ReportJob::new(request);
    ctx.controller.drive(&mut job).await;

    let (request, state) = job.into_parts();
    let result = match state {
        JobState::Resolved { document_id, .. } => {
            match ctx
                .fetcher
                .fetch(&document_id, request.record_path.as_deref())
                .await
            {
                Ok(Some(table)) if !table.is_empty() => ReportResult::success(table),
                Ok(_) => ReportResult::failed(ReportError::EmptyOrInvalidReportData.to_string()),
                Err(e) => {
                    tracing::error!(report = %name, error = %e, "Report fetch failed");
                    ReportResult::failed(e.to_string())
                }
            }
        }
        JobState::Failed { message, .. } => ReportResult::failed(message),
        // drive() only returns in a terminal state
        JobState::Submitting | JobState::Polling { .. } => {
            ReportResult::failed(format!("{UNEXPECTED_FAILURE_PREFIX}: job did not finish"))
        }
    };

    match &result.data {
        Some(table) => {
            tracing::info!(report = %name, rows = table.num_rows(), "Report fetched");
            ctx.emit(Event::ReportCompleted {
                name,
                rows: table.num_rows(),
            });
        }
        None => {
            tracing::warn!(report = %name, message = %result.message, "Report failed");
            ctx.emit(Event::ReportFailed {
                name,
                message: result.message.clone(),
            });
        }
    }

    result
}

/// Reject batches whose results could not be keyed unambiguously
fn validate_batch(batch: &ReportBatch) -> Result<()> {
    if batch.is_empty() {
        return Err(Error::EmptyBatch);
    }
    let mut seen = HashSet::with_capacity(batch.len());
    for request in batch.iter() {
        if request.name.trim().is_empty() {
            return Err(Error::EmptyReportName);
        }
        if !seen.insert(request.name.as_str()) {
            return Err(Error::DuplicateReportName(request.name.clone()));
        }
    }
    Ok(())
}

/// Load `config_path`, run `requests` and return `(results, all_success)`
///
/// `max_wait` is the wait budget of each retried stage and `max_workers`
/// caps the number of reports in flight.
pub async fn fetch_reports(
    config_path: impl AsRef<Path>,
    requests: impl Into<ReportBatch>,
    max_wait: Duration,
    max_workers: usize,
) -> Result<(HashMap<String, ReportResult>, bool)> {
    let pipeline = ReportPipeline::from_config_file(config_path)?;
    let result = pipeline.run_with(requests, max_wait, max_workers).await?;
    Ok(result.into_parts())
}
