//! # HTTP Handler Base
//!
//! The framework side of HTTP-backed step handlers: a connection
//! builder and a response processor that maps status codes onto the
//! error taxonomy. A handler implements `build_request`; the blanket
//! `StepHandler` impl sends it and converts the response to results.
//!
//! Status mapping: 2xx succeeds with the JSON body as results; 429 and
//! 503 are retryable and honor a `Retry-After` header as a
//! server-requested delay; other 4xx are permanent; 5xx are retryable.

use async_trait::async_trait;
use std::time::Duration;

use tasker_shared::models::{Task, WorkflowStep};

use crate::handler::{StepHandler, StepHandlerError};
use crate::sequence::StepSequence;

/// Shared connection for an HTTP handler: a configured client plus the
/// service base URL.
#[derive(Debug, Clone)]
pub struct HttpConnection {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConnection {
    pub fn builder(base_url: impl Into<String>) -> HttpConnectionBuilder {
        HttpConnectionBuilder {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            default_headers: Vec::new(),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug)]
pub struct HttpConnectionBuilder {
    base_url: String,
    timeout: Duration,
    default_headers: Vec<(String, String)>,
}

impl HttpConnectionBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<HttpConnection, StepHandlerError> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in &self.default_headers {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StepHandlerError::permanent(format!("invalid header name: {e}")))?;
            let value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| StepHandlerError::permanent(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| StepHandlerError::permanent(format!("http client build failed: {e}")))?;

        Ok(HttpConnection {
            client,
            base_url: self.base_url,
        })
    }
}

/// Map a response onto results or the error taxonomy
pub async fn process_response(
    response: reqwest::Response,
) -> Result<serde_json::Value, StepHandlerError> {
    let status = response.status();
    let retry_after = parse_retry_after(&response);

    if status.is_success() {
        return response.json::<serde_json::Value>().await.map_err(|e| {
            StepHandlerError::permanent(format!("response body is not valid JSON: {e}"))
        });
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("http {status}: {body}");

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
    {
        return Err(match retry_after {
            Some(seconds) => StepHandlerError::retryable_after(message, seconds),
            None => StepHandlerError::retryable(message),
        });
    }
    if status.is_client_error() {
        return Err(StepHandlerError::permanent_with_reason(
            message,
            "client_error",
        ));
    }
    Err(StepHandlerError::retryable(message))
}

fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

/// An HTTP-backed step handler: supply the connection and the request;
/// sending and response classification are framework concerns.
#[async_trait]
pub trait HttpStepHandler: Send + Sync + std::fmt::Debug {
    fn connection(&self) -> &HttpConnection;

    /// Build the request for this step from the task context and prior
    /// step results
    async fn build_request(
        &self,
        task: &Task,
        sequence: &StepSequence,
        step: &WorkflowStep,
    ) -> Result<reqwest::RequestBuilder, StepHandlerError>;
}

#[async_trait]
impl<T: HttpStepHandler> StepHandler for T {
    async fn process(
        &self,
        task: &Task,
        sequence: &StepSequence,
        step: &WorkflowStep,
    ) -> Result<serde_json::Value, StepHandlerError> {
        let request = self.build_request(task, sequence, step).await?;
        let response = request
            .send()
            .await
            .map_err(|e| StepHandlerError::retryable(format!("request failed: {e}")))?;
        process_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let connection = HttpConnection::builder("https://api.example.com/")
            .build()
            .unwrap();
        assert_eq!(
            connection.url("/v1/charges"),
            "https://api.example.com/v1/charges"
        );
        assert_eq!(
            connection.url("v1/charges"),
            "https://api.example.com/v1/charges"
        );
    }

    #[test]
    fn test_builder_rejects_invalid_header() {
        let result = HttpConnection::builder("https://api.example.com")
            .header("bad header name", "x")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_with_headers_and_timeout() {
        let connection = HttpConnection::builder("https://api.example.com")
            .timeout(Duration::from_secs(5))
            .header("x-api-key", "secret")
            .build();
        assert!(connection.is_ok());
    }
}
