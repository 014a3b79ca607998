//! Reports API client
//!
//! Thin typed wrapper over the three authenticated reports endpoints. Each
//! method performs exactly one HTTP request; retrying is the caller's job.

use crate::error::{Error, Result};
use crate::types::{AccessToken, ProcessingStatus};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Path prefix of the reports API version this client speaks
pub const REPORTS_API_PATH: &str = "/reports/2021-06-30";

/// Header carrying the access token
pub const ACCESS_TOKEN_HEADER: &str = "x-amz-access-token";

/// Compression value the API uses for gzip documents
pub const GZIP_COMPRESSION: &str = "GZIP";

const MAX_ERROR_BODY_LEN: usize = 512;

/// Body of a report status response
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatusResponse {
    /// Report id
    #[serde(default)]
    pub report_id: Option<String>,
    /// Current processing state
    pub processing_status: ProcessingStatus,
    /// Document id, present once the report is DONE
    #[serde(default)]
    pub report_document_id: Option<String>,
}

/// Body of a document resolution response
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    /// Document id
    #[serde(default)]
    pub report_document_id: Option<String>,
    /// Time-limited, pre-signed download URL
    #[serde(default)]
    pub url: Option<String>,
    /// Compression of the payload behind `url`, e.g. `GZIP`
    #[serde(default)]
    pub compression_algorithm: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateReportResponse {
    #[serde(default)]
    report_id: Option<String>,
}

/// Authenticated client for the reports endpoints
#[derive(Clone, Debug)]
pub struct ReportsApi {
    client: reqwest::Client,
    base_url: Url,
    token: AccessToken,
    request_timeout: Option<Duration>,
}

impl ReportsApi {
    /// Create a client for the API hosted at `base_url`
    pub fn new(client: reqwest::Client, base_url: &str, token: AccessToken) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            Error::config(
                format!("invalid API base URL: {}", e),
                "endpoints.api_base_url",
            )
        })?;
        Ok(Self {
            client,
            base_url,
            token,
            request_timeout: None,
        })
    }

    /// Bound each API call, body included, by `timeout`
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Submit a report creation request
    ///
    /// Succeeds only on HTTP 202 with a `reportId` in the body.
    pub async fn create_report(&self, body: &serde_json::Value) -> Result<String> {
        const ENDPOINT: &str = "create report";

        let url = self.endpoint(&["reports"]);
        let response = self
            .authorized(self.client.post(url))
            .json(body)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::ACCEPTED {
            return Err(status_error(ENDPOINT, response).await);
        }

        let parsed: CreateReportResponse = read_json(ENDPOINT, response).await?;
        parsed.report_id.ok_or_else(|| Error::MalformedResponse {
            endpoint: ENDPOINT,
            reason: "response has no reportId".to_string(),
        })
    }

    /// Fetch the processing status of a report
    pub async fn get_report(&self, report_id: &str) -> Result<ReportStatusResponse> {
        const ENDPOINT: &str = "report status";

        let url = self.endpoint(&["reports", report_id]);
        let response = self.authorized(self.client.get(url)).send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(ENDPOINT, response).await);
        }
        read_json(ENDPOINT, response).await
    }

    /// Resolve a document id to its download location
    pub async fn get_document(&self, document_id: &str) -> Result<ReportDocument> {
        const ENDPOINT: &str = "report document";

        let url = self.endpoint(&["documents", document_id]);
        let response = self
            .authorized(self.client.get(url))
            .header("compressionAlgorithm", GZIP_COMPRESSION)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(ENDPOINT, response).await);
        }
        read_json(ENDPOINT, response).await
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header(ACCESS_TOKEN_HEADER, self.token.as_str());
        match self.request_timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut path = self.base_url.path().trim_end_matches('/').to_string();
        path.push_str(REPORTS_API_PATH);
        for segment in segments {
            path.push('/');
            path.push_str(&urlencoding::encode(segment));
        }
        let mut url = self.base_url.clone();
        url.set_path(&path);
        url
    }
}

/// Build an [`Error::HttpStatus`] from a non-success response
pub(crate) async fn status_error(endpoint: &'static str, response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY_LEN {
        let mut cut = MAX_ERROR_BODY_LEN;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Error::HttpStatus {
        endpoint,
        status,
        body,
    }
}

/// Parse a JSON body, reporting an unparsable body as malformed
pub(crate) async fn read_json<T>(endpoint: &'static str, response: reqwest::Response) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| Error::MalformedResponse {
        endpoint,
        reason: e.to_string(),
    })
}
