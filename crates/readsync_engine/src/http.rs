//! HTTP transport abstraction.
//!
//! The actual HTTP client is abstracted via a trait so the remote client can
//! run against `reqwest` in production and against [`MockRemote`] in tests.
//!
//! [`MockRemote`]: crate::MockRemote

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// A JSON POST to the remote endpoint.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Target URL.
    pub url: String,
    /// Bearer token.
    pub bearer: String,
    /// JSON body.
    pub body: Vec<u8>,
    /// Deliver even if the caller goes away (page unload, book close).
    pub keepalive: bool,
}

/// Response of a POST.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
    /// `Retry-After` hint, if the remote sent one.
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    /// Creates a 200 response.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            retry_after: None,
        }
    }

    /// Creates a response with an arbitrary status and empty body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            retry_after: None,
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// `Err` means the request never produced an HTTP response (DNS, connect,
/// TLS, timeout, reset).
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Sends a POST request.
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("readsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { client })
    }

    async fn send(client: reqwest::Client, request: HttpRequest) -> Result<HttpResponse, String> {
        let response = client
            .post(&request.url)
            .bearer_auth(&request.bearer)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.bytes().await.map_err(|e| e.to_string())?.to_vec();

        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        if !request.keepalive {
            return Self::send(self.client.clone(), request).await;
        }

        // Detached so that dropping the caller does not cancel delivery.
        let task = tokio::spawn(Self::send(self.client.clone(), request));
        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "keepalive request task failed");
                Err(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_helpers() {
        assert!(HttpResponse::ok("{}").is_success());
        assert!(!HttpResponse::status(503).is_success());
        assert_eq!(HttpResponse::status(429).body.len(), 0);
    }

    #[test]
    fn reqwest_client_builds() {
        assert!(ReqwestClient::new(Duration::from_secs(10)).is_ok());
    }
}
