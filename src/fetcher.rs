//! Report document retrieval
//!
//! Resolves a document id to its pre-signed URL, streams the payload,
//! decompresses it as it arrives and flattens the parsed JSON into a
//! [`Table`]. None of these steps are retried: the create and poll work is
//! already sunk, so a failure here fails the report immediately.

use crate::api::{GZIP_COMPRESSION, ReportsApi};
use crate::error::ReportError;
use crate::table::{self, Table};
use flate2::write::GzDecoder;
use futures::StreamExt;
use std::future::Future;
use std::io::Write;
use std::time::Duration;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How the downloaded bytes are encoded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Compression {
    Gzip,
    /// Not declared by the API; decided from the first bytes
    Detect,
}

impl Compression {
    fn from_algorithm(algorithm: Option<&str>) -> Result<Self, ReportError> {
        match algorithm {
            Some(a) if a.eq_ignore_ascii_case(GZIP_COMPRESSION) => Ok(Compression::Gzip),
            None => Ok(Compression::Detect),
            Some(other) => Err(ReportError::DecodeFailed {
                reason: format!("unsupported compression algorithm {other}"),
            }),
        }
    }
}

/// Incremental decoder fed one chunk at a time
enum Decoder {
    /// Waiting for enough bytes to recognise the gzip header
    Sniffing(Vec<u8>),
    Plain(Vec<u8>),
    Gzip(GzDecoder<Vec<u8>>),
}

impl Decoder {
    fn new(compression: Compression) -> Self {
        match compression {
            Compression::Gzip => Decoder::Gzip(GzDecoder::new(Vec::new())),
            Compression::Detect => Decoder::Sniffing(Vec::new()),
        }
    }

    fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        match self {
            Decoder::Plain(buf) => {
                buf.extend_from_slice(chunk);
                Ok(())
            }
            Decoder::Gzip(gz) => gz.write_all(chunk),
            Decoder::Sniffing(head) => {
                head.extend_from_slice(chunk);
                if head.len() < GZIP_MAGIC.len() {
                    return Ok(());
                }
                let head = std::mem::take(head);
                *self = Self::detected(&head);
                self.write(&head)
            }
        }
    }

    fn detected(head: &[u8]) -> Self {
        if head.starts_with(&GZIP_MAGIC) {
            Decoder::Gzip(GzDecoder::new(Vec::new()))
        } else {
            Decoder::Plain(Vec::new())
        }
    }

    fn finish(self) -> std::io::Result<Vec<u8>> {
        match self {
            // Shorter than a gzip header, so it can only be plain
            Decoder::Sniffing(head) | Decoder::Plain(head) => Ok(head),
            Decoder::Gzip(gz) => gz.finish(),
        }
    }
}

/// Downloads and tabulates resolved report documents
#[derive(Clone, Debug)]
pub struct ReportFetcher {
    api: ReportsApi,
    client: reqwest::Client,
    idle_timeout: Option<Duration>,
}

impl ReportFetcher {
    /// Create a fetcher
    ///
    /// `client` performs the document download itself; it must not carry
    /// API credentials since the URL is pre-signed, nor a total request
    /// timeout, which would cut off large documents mid-stream.
    pub fn new(api: ReportsApi, client: reqwest::Client) -> Self {
        Self {
            api,
            client,
            idle_timeout: None,
        }
    }

    /// Fail a download that waits longer than `timeout` for its response
    /// headers or for any single body chunk
    ///
    /// The download as a whole may take as long as it keeps making progress.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Fetch a document and flatten it into a table
    ///
    /// `Ok(None)` means the document decoded fine but held nothing to
    /// tabulate.
    pub async fn fetch(
        &self,
        document_id: &str,
        record_path: Option<&str>,
    ) -> Result<Option<Table>, ReportError> {
        let document = self.api.get_document(document_id).await.map_err(|e| {
            ReportError::DocumentResolutionFailed {
                document_id: document_id.to_string(),
                reason: e.to_string(),
            }
        })?;

        let url = document
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ReportError::DocumentResolutionFailed {
                document_id: document_id.to_string(),
                reason: "response has no url".to_string(),
            })?;
        let compression = Compression::from_algorithm(document.compression_algorithm.as_deref())?;

        tracing::debug!(document_id, ?compression, "Downloading report document");

        let bytes = self.download(&url, compression).await?;
        let parsed: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| ReportError::DecodeFailed {
                reason: format!("invalid JSON: {e}"),
            })?;

        let table = table::flatten(&parsed, record_path);
        tracing::debug!(
            document_id,
            decoded_bytes = bytes.len(),
            rows = table.as_ref().map_or(0, Table::num_rows),
            "Report document decoded"
        );
        Ok(table)
    }

    async fn download(&self, url: &str, compression: Compression) -> Result<Vec<u8>, ReportError> {
        let response = self
            .idle_bounded(self.client.get(url).send())
            .await?
            .map_err(|e| ReportError::DownloadFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::DownloadFailed {
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let mut decoder = Decoder::new(compression);
        let mut stream = Box::pin(response.bytes_stream());
        while let Some(chunk) = self.idle_bounded(stream.next()).await? {
            let chunk = chunk.map_err(|e| ReportError::DownloadFailed {
                reason: e.to_string(),
            })?;
            decoder
                .write(&chunk)
                .map_err(|e| ReportError::DecodeFailed {
                    reason: format!("decompression failed: {e}"),
                })?;
        }

        decoder.finish().map_err(|e| ReportError::DecodeFailed {
            reason: format!("decompression failed: {e}"),
        })
    }

    async fn idle_bounded<F: Future>(&self, fut: F) -> Result<F::Output, ReportError> {
        match self.idle_timeout {
            Some(timeout) => {
                tokio::time::timeout(timeout, fut)
                    .await
                    .map_err(|_| ReportError::DownloadFailed {
                        reason: format!("no data received for {}ms", timeout.as_millis()),
                    })
            }
            None => Ok(fut.await),
        }
    }
}
