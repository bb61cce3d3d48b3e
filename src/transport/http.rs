//! reqwest-backed sender.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{CallContext, HttpRequest, HttpResponse, Transport};
use crate::error::{ProviderError, Result};

/// Sends requests over a pooled reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Create a sender for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|e| {
                ProviderError::Configuration(format!("failed to create HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest, ctx: &CallContext) -> Result<HttpResponse> {
        if ctx.is_cancelled() {
            return Err(ProviderError::Cancelled(format!(
                "{} {} not sent",
                request.method, request.path
            )));
        }

        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        debug!(
            method = %request.method,
            path = %request.path,
            status = status.as_u16(),
            bytes = body.len(),
            "HTTP exchange completed"
        );
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let transport =
            ReqwestTransport::new("https://api.example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            transport.url("/api/dashboards"),
            "https://api.example.com/api/dashboards"
        );
    }

    #[tokio::test]
    async fn test_cancelled_context_sends_nothing() {
        let transport =
            ReqwestTransport::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let (handle, token) = super::super::cancellation();
        handle.cancel();
        let ctx = CallContext::new().with_cancel(token);
        let err = transport
            .send(&HttpRequest::new(reqwest::Method::GET, "/x"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(_)));
    }
}
