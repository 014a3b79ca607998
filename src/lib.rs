//! # sp-reports
//!
//! Async retrieval of asynchronously-generated reports.
//!
//! A report is *requested*, *polled* until the API has generated it, then
//! *downloaded*, gzip-*decompressed* and *parsed* into a [`Table`]. Batches
//! of named reports run concurrently under a bounded worker count and come
//! back as one [`ReportResult`] per name plus an aggregate success flag.
//!
//! ## Design
//!
//! - **Time-budgeted retries** - every retried stage gets its own wait
//!   budget with exponential backoff; the budget is measured in time spent
//!   waiting, not in attempts
//! - **Explicit job states** - each report moves through
//!   [`JobState`](job::JobState) so a resolved job always has a document id
//! - **Failures stay local** - only configuration and authentication errors
//!   abort a run; anything else fails just the report it happened to
//! - **Event-driven** - consumers can subscribe to lifecycle events
//!
//! ## Quick Start
//!
//! ```no_run
//! use serde_json::json;
//! use sp_reports::{Config, ReportPipeline, ReportRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("reports.toml")?;
//!     let pipeline = ReportPipeline::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let result = pipeline
//!         .run(vec![
//!             ReportRequest::new(
//!                 "daily_sales",
//!                 json!({"reportType": "GET_VENDOR_SALES_REPORT"}),
//!             ),
//!             ReportRequest::new(
//!                 "promotion",
//!                 json!({"reportType": "GET_PROMOTION_PERFORMANCE_REPORT"}),
//!             ),
//!         ])
//!         .await?;
//!
//!     for (name, report) in result.results() {
//!         println!("{name}: {:?} ({})", report.status, report.message);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Reports API client
pub mod api;
/// Access token acquisition
pub mod auth;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Document download and decoding
pub mod fetcher;
/// Report job state machine
pub mod job;
/// Batch orchestration
pub mod pipeline;
/// Retry logic with exponential backoff
pub mod retry;
/// Tabular report data
pub mod table;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use auth::TokenProvider;
pub use config::{Config, Credentials, EndpointConfig, PipelineConfig, RetryConfig};
pub use error::{Error, ReportError, Result};
pub use fetcher::ReportFetcher;
pub use job::{JobState, ReportJob, ReportJobController};
pub use pipeline::{ReportPipeline, fetch_reports};
pub use table::Table;
pub use types::{
    AccessToken, Event, PipelineResult, ProcessingStatus, ReportBatch, ReportRequest,
    ReportResult, ReportStatus, Stage,
};
