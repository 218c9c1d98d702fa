use std::time::Duration;

use quarry_core::error::AppError;
use reqwest::{Client, StatusCode};

/// Shared JSON-over-HTTP client for source connectors.
///
/// Maps transport failures onto [`AppError`] so the orchestrator can tell
/// transient problems (timeouts, refused connections, 429/5xx) from
/// permanent ones.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    timeout_secs: u64,
}

impl HttpClient {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(20))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent("Quarry/0.1 (job listing aggregator)")
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    /// GET `url` and decode the body as JSON.
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value, AppError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimitExceeded);
        }
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| AppError::ParseError(format!("Invalid JSON from {url}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_connection_is_retryable() {
        let client = HttpClient::with_timeout(Duration::from_secs(2)).unwrap();
        let err = client.get_json("http://127.0.0.1:9/api").await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_invalid_url_is_http_error() {
        let client = HttpClient::new().unwrap();
        let err = client.get_json("not a url").await.unwrap_err();
        assert!(matches!(err, AppError::HttpError(_)));
    }
}
