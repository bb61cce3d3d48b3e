//! Retry with exponential backoff for rate-limited and unavailable responses.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::{CallContext, HttpRequest, HttpResponse, Transport};
use crate::error::{ProviderError, Result};

/// Status codes that are retried: 429, 502, 503, 504.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Retry policy configuration. Holds no per-call state.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub min_wait: Duration,
    /// Ceiling for the exponential part of the backoff.
    pub max_wait: Duration,
    /// Upper bound of the random extra delay, as a fraction of the backoff.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given retry count and default waits.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the backoff bounds.
    pub fn with_waits(mut self, min_wait: Duration, max_wait: Duration) -> Self {
        self.min_wait = min_wait;
        self.max_wait = max_wait;
        self
    }

    /// Set the jitter fraction (0 disables jitter).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() { jitter.max(0.0) } else { 0.0 };
        self
    }

    /// Backoff before retry number `attempt` (zero-based), without jitter:
    /// `min(min_wait * 2^attempt, max_wait)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.min_wait.saturating_mul(factor).min(self.max_wait)
    }

    /// Backoff before retry number `attempt`, including jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let fraction = rand::thread_rng().gen_range(0.0..=self.jitter);
        base.saturating_add(scale(base, fraction))
    }

    /// Longest total time spent waiting across all retries. Saturates at
    /// [`Duration::MAX`].
    pub fn max_total_wait(&self) -> Duration {
        (0..self.max_retries).fold(Duration::ZERO, |total, attempt| {
            let base = self.base_delay(attempt);
            total
                .saturating_add(base)
                .saturating_add(scale(base, self.jitter))
        })
    }
}

/// `duration * factor`, saturating instead of panicking on overflow.
fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// Decorator that resends rate-limited requests.
///
/// A response with a retryable status is followed by a backoff wait and another
/// attempt, up to `max_retries` times. After the last wait one final attempt is
/// made and its outcome is returned unchanged, so persistent rate limiting shows
/// up as the last 429 rather than being swallowed. Transport errors are not
/// retried.
#[derive(Debug, Clone)]
pub struct RetryTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> RetryTransport<T> {
    /// Wrap `inner` with the given policy.
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryTransport<T> {
    async fn send(&self, request: &HttpRequest, ctx: &CallContext) -> Result<HttpResponse> {
        for attempt in 0..self.policy.max_retries {
            let response = self.inner.send(request, ctx).await?;
            if !is_retryable_status(response.status) {
                return Ok(response);
            }

            let delay = self.policy.delay(attempt);
            warn!(
                method = %request.method,
                path = %request.path,
                status = response.status.as_u16(),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Retryable response, backing off"
            );
            ctx.sleep(delay).await?;

            if ctx.is_cancelled() {
                return Err(ProviderError::Cancelled(format!(
                    "{} {} cancelled before retry",
                    request.method, request.path
                )));
            }
        }

        debug!(
            method = %request.method,
            path = %request.path,
            retries = self.policy.max_retries,
            "Making final attempt"
        );
        self.inner.send(request, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockResponse, MockTransport};
    use crate::transport::cancellation;
    use reqwest::Method;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries).with_waits(Duration::from_secs(1), Duration::from_secs(4))
    }

    fn request() -> HttpRequest {
        HttpRequest::new(Method::POST, "/api/rbac/policy/create").with_body(b"{\"a\":1}".to_vec())
    }

    #[test]
    fn test_base_delay_doubles_and_caps() {
        let policy = policy(10);
        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(2), Duration::from_secs(4));
        assert_eq!(policy.base_delay(3), Duration::from_secs(4));
        assert_eq!(policy.base_delay(40), Duration::from_secs(4));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = policy(10);
        for attempt in 0..5 {
            for _ in 0..50 {
                let delay = policy.delay(attempt);
                let base = policy.base_delay(attempt);
                assert!(delay >= base);
                assert!(delay <= base.mul_f64(1.25));
            }
        }
        let no_jitter = policy.clone().with_jitter(0.0);
        assert_eq!(no_jitter.delay(1), Duration::from_secs(2));
    }

    #[test]
    fn test_total_wait_saturates() {
        assert_eq!(policy(3).with_jitter(0.0).max_total_wait(), Duration::from_secs(7));

        let huge = RetryPolicy::new(64).with_waits(Duration::MAX, Duration::MAX);
        assert_eq!(huge.max_total_wait(), Duration::MAX);
        assert_eq!(huge.delay(0), Duration::MAX);
        assert_eq!(policy(1).with_jitter(f64::INFINITY).jitter, 0.0);
    }

    #[test]
    fn test_retryable_statuses() {
        for code in [429u16, 502, 503, 504] {
            assert!(is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
        for code in [200u16, 400, 404, 409, 500, 501] {
            assert!(!is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_success() {
        for n in 1..=4u32 {
            let mock = Arc::new(MockTransport::new());
            for _ in 1..n {
                mock.push(MockResponse::status(429));
            }
            mock.push(MockResponse::json(200, serde_json::json!({"ok": true})));

            let policy = policy(5);
            let transport = RetryTransport::new(mock.clone(), policy.clone());
            let start = Instant::now();
            let response = transport
                .send(&request(), &CallContext::new())
                .await
                .unwrap();
            let elapsed = start.elapsed();

            assert_eq!(response.status, StatusCode::OK);
            assert_eq!(mock.request_count(), n as usize);

            let floor: Duration = (0..n - 1).map(|a| policy.base_delay(a)).sum();
            let ceiling: Duration = (0..n - 1).map(|a| policy.base_delay(a).mul_f64(1.25)).sum();
            assert!(elapsed >= floor, "n={n}: {elapsed:?} < {floor:?}");
            assert!(elapsed <= ceiling, "n={n}: {elapsed:?} > {ceiling:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_body_resent_on_every_attempt() {
        let mock = Arc::new(MockTransport::new());
        mock.push(MockResponse::status(503));
        mock.push(MockResponse::status(502));
        mock.push(MockResponse::json(200, serde_json::json!({})));

        let transport = RetryTransport::new(mock.clone(), policy(3));
        transport.send(&request(), &CallContext::new()).await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        for sent in requests {
            assert_eq!(sent.body.as_deref(), Some(&b"{\"a\":1}"[..]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_final_response() {
        let mock = Arc::new(MockTransport::new());
        for _ in 0..3 {
            mock.push(MockResponse::status(429));
        }

        let transport = RetryTransport::new(mock.clone(), policy(2));
        let response = transport.send(&request(), &CallContext::new()).await.unwrap();
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(mock.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_returned_immediately() {
        let mock = Arc::new(MockTransport::new());
        mock.push(MockResponse::status(500));

        let transport = RetryTransport::new(mock.clone(), policy(3));
        let start = Instant::now();
        let response = transport.send(&request(), &CallContext::new()).await.unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mock.request_count(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let mock = Arc::new(MockTransport::new());
        for _ in 0..5 {
            mock.push(MockResponse::status(429));
        }

        let policy = RetryPolicy::new(4).with_waits(Duration::from_secs(10), Duration::from_secs(60));
        let transport = RetryTransport::new(mock.clone(), policy);
        let (handle, token) = cancellation();
        let ctx = CallContext::new().with_cancel(token);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            handle.cancel();
        });

        let start = Instant::now();
        let err = transport.send(&request(), &ctx).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(_)));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn test_max_total_wait() {
        let policy = policy(3).with_jitter(0.25);
        // 1 + 2 + 4 seconds, each with 25% headroom.
        assert_eq!(policy.max_total_wait(), Duration::from_millis(8750));
        assert_eq!(RetryPolicy::new(0).max_total_wait(), Duration::ZERO);
    }
}
