//! Testing utilities for the provider.
//!
//! [`ProviderTester`] drives a [`ProviderService`] through its lifecycle
//! without a host process, and [`MockTransport`] replaces the network with
//! scripted responses while recording every request sent.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hemmer_provider_groundcover::testing::{MockResponse, MockTransport, ProviderTester};
//! use hemmer_provider_groundcover::GroundcoverProvider;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_policy() {
//!     let mock = Arc::new(MockTransport::new());
//!     mock.push(MockResponse::json(200, json!({"uuid": "p-1", "name": "ops", "revisionNumber": 1})));
//!
//!     let tester = ProviderTester::new(GroundcoverProvider::new().with_transport(mock.clone()));
//!     tester.configure(json!({"api_url": "https://api.example.com", "api_key": "k", "backend_id": "b"})).await.unwrap();
//!
//!     let state = tester.create("groundcover_policy", json!({"name": "ops", "role": {"admin": "admin"}})).await.unwrap();
//!     assert_eq!(state["uuid"], "p-1");
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::service::ProviderService;
use crate::transport::{CallContext, HttpRequest, HttpResponse, RetryPolicy, Transport};
use crate::types::{ImportedResource, PlanResult};

/// A scripted response for [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    body: Vec<u8>,
    content_type: Option<String>,
    delay: Option<Duration>,
}

impl MockResponse {
    /// A response with an empty body and no content type.
    pub fn status(status: u16) -> Self {
        Self::raw(status, "", None)
    }

    /// A JSON response.
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
            content_type: Some("application/json".to_string()),
            delay: None,
        }
    }

    /// A response with a raw body and an optional content type.
    pub fn raw(status: u16, body: &str, content_type: Option<&str>) -> Self {
        Self {
            status,
            body: body.as_bytes().to_vec(),
            content_type: content_type.map(str::to_string),
            delay: None,
        }
    }

    /// Delay the response by `delay` (tokio time, so paused clocks apply).
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn into_response(self) -> Result<HttpResponse, ProviderError> {
        let status = StatusCode::from_u16(self.status).map_err(|e| {
            ProviderError::InvalidRequest(format!("invalid mock status {}: {}", self.status, e))
        })?;
        let mut headers = HeaderMap::new();
        if let Some(ct) = &self.content_type {
            let value = HeaderValue::from_str(ct).map_err(|e| {
                ProviderError::InvalidRequest(format!("invalid mock content type: {}", e))
            })?;
            headers.insert(CONTENT_TYPE, value);
        }
        let mut response = HttpResponse::new(status, self.body);
        response.headers = headers;
        Ok(response)
    }
}

/// A [`Transport`] answering from a queue of [`MockResponse`]s.
///
/// Requests are recorded in the order they were sent. Sending with an empty
/// queue fails with [`ProviderError::InvalidRequest`] naming the request.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    /// Create a transport with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    pub fn push(&self, response: MockResponse) {
        lock(&self.responses).push_back(response);
    }

    /// Number of requests sent so far.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// All requests sent so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// The JSON body of the `index`th request, or `Value::Null` if it had none.
    pub fn request_json(&self, index: usize) -> Value {
        lock(&self.requests)
            .get(index)
            .and_then(|r| r.body.as_deref())
            .and_then(|b| serde_json::from_slice(b).ok())
            .unwrap_or(Value::Null)
    }

    /// Number of scripted responses not consumed yet.
    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &HttpRequest, _ctx: &CallContext) -> Result<HttpResponse, ProviderError> {
        lock(&self.requests).push(request.clone());
        let next = lock(&self.responses).pop_front();
        let Some(scripted) = next else {
            return Err(ProviderError::InvalidRequest(format!(
                "no scripted response for {} {}",
                request.method, request.path
            )));
        };
        if let Some(delay) = scripted.delay {
            tokio::time::sleep(delay).await;
        }
        scripted.into_response()
    }
}

/// A resolved client configuration pointing at a fake endpoint.
pub fn test_client_config() -> ClientConfig {
    ClientConfig {
        api_url: "https://api.example.com".to_string(),
        api_key: "test-api-key".to_string(),
        backend_id: "test-backend".to_string(),
        retry: RetryPolicy::default(),
        request_timeout: Duration::from_secs(30),
    }
}

/// Provider configuration matching [`test_client_config`].
pub fn test_provider_config() -> Value {
    serde_json::json!({
        "api_url": "https://api.example.com",
        "api_key": "test-api-key",
        "backend_id": "test-backend",
    })
}

/// A test harness for provider implementations.
///
/// Wraps a [`ProviderService`] and offers lifecycle helpers that chain
/// plan, apply and read the way the host does.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Validate provider configuration.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Create a new resource.
    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource (`Value::Null` if gone).
    pub async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Run a full create lifecycle: plan → create → read.
    pub async fn lifecycle_create(&self, resource_type: &str, config: Value) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created).await
    }

    /// Run a full update lifecycle: plan → update → read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read(resource_type, updated).await
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// Assert that a plan has no changes.
///
/// # Panics
///
/// Panics if the plan has any changes or requires replacement.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan updates in place.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(!plan.changes.is_empty(), "Expected plan to have changes");
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}'. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary or
/// detail substring.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let matching = diagnostics.iter().any(|d| {
        d.is_error()
            && (d.summary.contains(substring)
                || d.detail.as_deref().is_some_and(|detail| detail.contains(substring)))
    });
    assert!(
        matching,
        "Expected an error containing '{}'. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_transport_replays_in_order() {
        let mock = MockTransport::new();
        mock.push(MockResponse::status(204));
        mock.push(MockResponse::json(200, json!({"ok": true})));

        let ctx = CallContext::new();
        let first = mock
            .send(&HttpRequest::new(Method::DELETE, "/a"), &ctx)
            .await
            .unwrap();
        assert_eq!(first.status, StatusCode::NO_CONTENT);
        assert_eq!(first.content_type(), None);

        let request = HttpRequest::new(Method::POST, "/b").with_body(br#"{"n":1}"#.to_vec());
        let second = mock.send(&request, &ctx).await.unwrap();
        assert_eq!(second.content_type().as_deref(), Some("application/json"));
        assert_eq!(second.body, br#"{"ok":true}"#.to_vec());

        assert_eq!(mock.request_count(), 2);
        assert_eq!(mock.requests()[1].path, "/b");
        assert_eq!(mock.request_json(1), json!({"n": 1}));
        assert_eq!(mock.request_json(0), Value::Null);
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_mock_transport_empty_queue() {
        let mock = MockTransport::new();
        let err = mock
            .send(&HttpRequest::new(Method::GET, "/nothing"), &CallContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("GET /nothing"));
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn test_test_client_config() {
        let config = test_client_config();
        assert_eq!(config.api_key, "test-api-key");
        assert_eq!(config.backend_id, "test-backend");
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![Diagnostic::error("Invalid configuration value")
            .with_detail("Expected one of [a, b]")];
        assert_error_contains(&diagnostics, "Invalid");
        assert_error_contains(&diagnostics, "one of");
    }

    #[test]
    #[should_panic(expected = "Expected an error containing")]
    fn test_assert_error_contains_ignores_warnings() {
        let diagnostics = vec![Diagnostic::warning("Invalid but only a warning")];
        assert_error_contains(&diagnostics, "Invalid");
    }

    #[test]
    fn test_plan_assertions() {
        use crate::types::AttributeChange;

        let plan = PlanResult::with_changes(
            json!({"name": "new"}),
            vec![AttributeChange::modified("name", json!("old"), json!("new"))],
            false,
        );
        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "name");

        let replace = PlanResult::with_changes(json!({}), vec![], true);
        assert_plan_replaces(&replace);
        assert_plan_no_changes(&PlanResult::no_change(json!({})));
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("field1"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("Second error"));
        assert!(display.contains("field1"));
        assert!(display.contains("More info"));
    }
}
