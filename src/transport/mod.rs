//! Outbound HTTP plumbing.
//!
//! Every API call goes through a [`Transport`]. The default stack built by
//! [`default_stack`] layers decorators over the reqwest sender:
//!
//! ```text
//! ContentTypeFix -> RetryTransport -> ReqwestTransport
//! ```
//!
//! Requests and responses are fully buffered so a decorator can resend the same
//! bytes or rewrite headers without touching the connection.

mod content_type;
mod http;
mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::error::{ProviderError, Result};

pub use content_type::{ContentTypeFix, ContentTypeRule, YAML_CONTENT_TYPE};
pub use http::ReqwestTransport;
pub use retry::{is_retryable_status, RetryPolicy, RetryTransport};

/// A buffered outbound request. `path` is relative to the API base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Path (and query) below the base URL, starting with `/`.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body, if any.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Create a request without headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Attach a body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// A buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Full response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create a response with the given status and body.
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// The `Content-Type` header, without parameters, lower-cased.
    pub fn content_type(&self) -> Option<String> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(';')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_lowercase()
            })
            .filter(|v| !v.is_empty())
    }
}

/// Something that can send an [`HttpRequest`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the buffered response.
    ///
    /// Non-success statuses are returned as responses, not errors. Errors mean
    /// the exchange itself failed (network, cancellation).
    async fn send(&self, request: &HttpRequest, ctx: &CallContext) -> Result<HttpResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: &HttpRequest, ctx: &CallContext) -> Result<HttpResponse> {
        (**self).send(request, ctx).await
    }
}

/// Build the default transport stack for a resolved configuration.
pub fn default_stack(config: &ClientConfig) -> Result<Arc<dyn Transport>> {
    let sender = ReqwestTransport::new(&config.api_url, config.request_timeout)?;
    let retrying = RetryTransport::new(sender, config.retry.clone());
    Ok(Arc::new(ContentTypeFix::with_default_rules(retrying)))
}

/// Create a linked cancellation handle and token.
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Triggers cancellation of every call holding the paired [`CancelToken`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes cancellation requested through a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested. Never resolves if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Per-call context: optional cancellation and deadline.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: Option<CancelToken>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe the given cancellation token.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Fail the call if it is still running at `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fail the call if it is still running after `timeout`. A timeout too
    /// large to represent leaves the call without a deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// The call deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the call has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Sleep for `delay`, returning early with [`ProviderError::Cancelled`] if
    /// the call is cancelled meanwhile.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(ProviderError::Cancelled(
                        "call cancelled while waiting to retry".to_string(),
                    )),
                    _ = tokio::time::sleep(delay) => Ok(()),
                }
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_content_type_strips_parameters() {
        let mut response = HttpResponse::new(StatusCode::OK, "{}");
        assert_eq!(response.content_type(), None);

        response.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("Application/JSON; charset=utf-8"),
        );
        assert_eq!(response.content_type().as_deref(), Some("application/json"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_without_cancel() {
        let ctx = CallContext::new();
        let start = Instant::now();
        ctx.sleep(Duration::from_secs(3)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_cancelled() {
        let (handle, token) = cancellation();
        let ctx = CallContext::new().with_cancel(token);
        let start = Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.cancel();
        });

        let err = ctx.sleep(Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(_)));
        assert!(start.elapsed() < Duration::from_secs(60));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_has_no_deadline() {
        assert!(CallContext::new().with_timeout(Duration::MAX).deadline().is_none());
        assert!(CallContext::new()
            .with_timeout(Duration::from_secs(5))
            .deadline()
            .is_some());
    }

    #[tokio::test]
    async fn test_dropped_handle_never_cancels() {
        let (handle, token) = cancellation();
        drop(handle);
        let ctx = CallContext::new().with_cancel(token);
        tokio_test::assert_ok!(ctx.sleep(Duration::from_millis(5)).await);
        assert!(!ctx.is_cancelled());
    }
}
