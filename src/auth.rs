//! Access token acquisition
//!
//! Exchanges the long-lived refresh token for a short-lived access token.
//! The exchange is retried under the configured backoff budget; once the
//! budget is spent the whole run fails with
//! [`Error::AuthenticationFailed`].

use crate::api::{read_json, status_error};
use crate::config::{Credentials, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::{IsRetryable, RetryError, retry_with_backoff};
use crate::types::{AccessToken, Stage};
use serde::Deserialize;

const ENDPOINT: &str = "token";

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// One failed exchange attempt
#[derive(Debug, thiserror::Error)]
enum ExchangeError {
    #[error(transparent)]
    Request(Error),

    #[error("token response has no access_token")]
    MissingToken { fatal: bool },
}

impl IsRetryable for ExchangeError {
    fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Request(e) => e.is_retryable(),
            ExchangeError::MissingToken { fatal } => !fatal,
        }
    }
}

/// Exchanges refresh credentials for access tokens
#[derive(Clone, Debug)]
pub struct TokenProvider {
    client: reqwest::Client,
    token_url: String,
    malformed_is_fatal: bool,
    request_timeout: Option<std::time::Duration>,
}

impl TokenProvider {
    /// Create a provider that talks to `token_url`
    pub fn new(client: reqwest::Client, token_url: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            malformed_is_fatal: false,
            request_timeout: None,
        }
    }

    /// Bound each exchange attempt by `timeout`
    pub fn with_request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Treat a successful response without `access_token` as a credential
    /// problem instead of a transient one
    pub fn with_malformed_response_fatal(mut self, fatal: bool) -> Self {
        self.malformed_is_fatal = fatal;
        self
    }

    /// Obtain an access token, retrying under `retry`'s budget
    pub async fn acquire_token(
        &self,
        credentials: &Credentials,
        retry: &RetryConfig,
    ) -> Result<AccessToken> {
        let result = retry_with_backoff(retry, Stage::Authenticate, || {
            self.exchange_once(credentials)
        })
        .await;

        match result {
            Ok(token) => {
                tracing::info!("Access token acquired");
                Ok(token)
            }
            Err(e) => {
                let waited = match &e {
                    RetryError::BudgetExhausted { waited, .. } => *waited,
                    RetryError::Permanent(_) => std::time::Duration::ZERO,
                };
                Err(Error::AuthenticationFailed {
                    waited,
                    reason: e.last_error_message(),
                })
            }
        }
    }

    async fn exchange_once(
        &self,
        credentials: &Credentials,
    ) -> std::result::Result<AccessToken, ExchangeError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", credentials.refresh_token.as_str()),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ];

        let mut request = self.client.post(&self.token_url).form(&form);
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::Request(e.into()))?;

        if !response.status().is_success() {
            return Err(ExchangeError::Request(
                status_error(ENDPOINT, response).await,
            ));
        }

        let fatal = self.malformed_is_fatal;
        let parsed: TokenResponse = read_json(ENDPOINT, response).await.map_err(|e| match e {
            Error::MalformedResponse { .. } => ExchangeError::MissingToken { fatal },
            other => ExchangeError::Request(other),
        })?;

        match parsed.access_token {
            Some(token) if !token.is_empty() => Ok(AccessToken::new(token)),
            _ => Err(ExchangeError::MissingToken { fatal }),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Credentials {
        Credentials::new("client-id", "client-secret", "Atzr|refresh")
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            base_wait: Duration::from_millis(10),
            max_wait: Duration::from_millis(80),
            jitter: false,
        }
    }

    fn provider(server: &MockServer) -> TokenProvider {
        TokenProvider::new(
            reqwest::Client::new(),
            format!("{}/auth/o2/token", server.uri()),
        )
    }

    #[tokio::test]
    async fn exchanges_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/o2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("client_id=client-id"))
            .and(body_string_contains("client_secret=client-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "Atza|access",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = provider(&server)
            .acquire_token(&credentials(), &fast_retry())
            .await
            .unwrap();
        assert_eq!(token.as_str(), "Atza|access");
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/o2/token"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/o2/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "Atza|ok"})),
            )
            .mount(&server)
            .await;

        let token = provider(&server)
            .acquire_token(&credentials(), &fast_retry())
            .await
            .unwrap();
        assert_eq!(token.as_str(), "Atza|ok");
    }

    #[tokio::test]
    async fn exhausted_budget_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/o2/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .acquire_token(&credentials(), &fast_retry())
            .await
            .unwrap_err();
        match err {
            Error::AuthenticationFailed { waited, reason } => {
                assert_eq!(waited, Duration::from_millis(80));
                assert!(reason.contains("401"), "reason was: {reason}");
                assert!(reason.contains("invalid_grant"), "reason was: {reason}");
            }
            other => panic!("expected AuthenticationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_token_field_is_retried_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/o2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "nope"})))
            .mount(&server)
            .await;

        let err = provider(&server)
            .acquire_token(&credentials(), &fast_retry())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed { .. }));

        // 10 + 20 + 40 + 10 ms of waits means four attempts
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 4);
    }

    #[tokio::test]
    async fn missing_token_field_fails_fast_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/o2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server)
            .with_malformed_response_fatal(true)
            .acquire_token(&credentials(), &fast_retry())
            .await
            .unwrap_err();
        match err {
            Error::AuthenticationFailed { waited, reason } => {
                assert_eq!(waited, Duration::ZERO);
                assert_eq!(reason, "token response has no access_token");
            }
            other => panic!("expected AuthenticationFailed, got {other:?}"),
        }
    }
}
