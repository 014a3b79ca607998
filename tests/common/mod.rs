//! Common test utilities for pipeline integration tests
//!
//! Everything runs against a single wiremock server standing in for both
//! the token endpoint and the reports API. Each report type gets its own
//! report id so mocks can be routed per request.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};
use sp_reports::{Config, Credentials, Event, ReportRequest};
use std::io::Write;
use std::time::Duration;
use tokio::sync::broadcast;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path of the token endpoint on the mock server
pub const TOKEN_PATH: &str = "/auth/o2/token";

/// Path of the report creation endpoint
pub const CREATE_PATH: &str = "/reports/2021-06-30/reports";

/// Budget used by every test: waits of 10, 20, 40 and a final 10 ms
pub fn fast_config(server: &MockServer) -> Config {
    let mut config = Config::new(Credentials::new("client-id", "client-secret", "Atzr|refresh"));
    config.endpoints.token_url = format!("{}{}", server.uri(), TOKEN_PATH);
    config.endpoints.api_base_url = server.uri();
    config.endpoints.request_timeout = Duration::from_secs(5);
    config.retry.base_wait = Duration::from_millis(10);
    config.retry.max_wait = Duration::from_millis(80);
    config
}

/// A request whose body carries `report_type`, used to route mocks
pub fn request(name: &str, report_type: &str) -> ReportRequest {
    ReportRequest::new(
        name,
        json!({
            "reportType": report_type,
            "marketplaceIds": ["ATVPDKIKX0DER"],
            "dataStartTime": "2024-01-01T00:00:00Z",
            "dataEndTime": "2024-01-01T23:59:59Z"
        }),
    )
}

/// Gzip-compress `bytes`
pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Three rows of vendor sales data
pub fn sales_rows() -> Value {
    json!([
        {"asin": "B000000001", "orderedUnits": 4, "orderedRevenue": {"amount": 59.96, "currencyCode": "USD"}},
        {"asin": "B000000002", "orderedUnits": 1, "orderedRevenue": {"amount": 12.49, "currencyCode": "USD"}},
        {"asin": "B000000003", "orderedUnits": 7, "orderedRevenue": {"amount": 70.00, "currencyCode": "USD"}}
    ])
}

/// Token endpoint that always succeeds
pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "Atza|access",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

/// Accept creation requests for `report_type` with `report_id`
pub async fn mount_create(server: &MockServer, report_type: &str, report_id: &str) {
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .and(body_partial_json(json!({"reportType": report_type})))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"reportId": report_id})))
        .mount(server)
        .await;
}

/// Status endpoint for `report_id` that always answers `status`
pub async fn mount_status(
    server: &MockServer,
    report_id: &str,
    status: &str,
    document_id: Option<&str>,
) {
    let mut body = json!({"reportId": report_id, "processingStatus": status});
    if let Some(id) = document_id {
        body["reportDocumentId"] = json!(id);
    }
    Mock::given(method("GET"))
        .and(path(format!("{}/{}", CREATE_PATH, report_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Document resolution plus the gzipped download behind it
pub async fn mount_document(server: &MockServer, document_id: &str, payload: &Value) {
    mount_document_response(
        server,
        document_id,
        ResponseTemplate::new(200).set_body_bytes(gzip(payload.to_string().as_bytes())),
    )
    .await;
}

/// Document resolution with a custom download response
pub async fn mount_document_response(
    server: &MockServer,
    document_id: &str,
    download: ResponseTemplate,
) {
    let download_path = format!("/download/{}", document_id);
    Mock::given(method("GET"))
        .and(path(format!("/reports/2021-06-30/documents/{}", document_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reportDocumentId": document_id,
            "url": format!("{}{}", server.uri(), download_path),
            "compressionAlgorithm": "GZIP"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(download_path))
        .respond_with(download)
        .mount(server)
        .await;
}

/// A report that goes straight to DONE and downloads `payload`
pub async fn mount_ready_report(server: &MockServer, report_type: &str, id: &str, payload: &Value) {
    let report_id = format!("R-{}", id);
    let document_id = format!("DOC-{}", id);
    mount_create(server, report_type, &report_id).await;
    mount_status(server, &report_id, "DONE", Some(&document_id)).await;
    mount_document(server, &document_id, payload).await;
}

/// Drain every event already buffered on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Highest number of jobs observed in flight at once
pub fn max_in_flight(events: &[Event]) -> usize {
    let mut current = 0usize;
    let mut max = 0usize;
    for event in events {
        match event {
            Event::JobStarted { .. } => {
                current += 1;
                max = max.max(current);
            }
            Event::ReportCompleted { .. } | Event::ReportFailed { .. } => {
                current = current.saturating_sub(1);
            }
            _ => {}
        }
    }
    max
}
