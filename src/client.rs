//! Request/response codec for the groundcover API.
//!
//! [`ApiClient`] turns typed requests into [`HttpRequest`]s, attaches the
//! authentication headers, sends them through the transport stack and decodes
//! the answer. Failed calls are turned into [`ApiFailure`]s and classified.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::{classify_result, ApiFailure, Operation};
use crate::config::ClientConfig;
use crate::error::{ProviderError, Result};
use crate::transport::{
    default_stack, CallContext, HttpRequest, HttpResponse, Transport, YAML_CONTENT_TYPE,
};

/// Header carrying the backend (tenant) identifier.
pub const BACKEND_ID_HEADER: &str = "x-backend-id";

/// Longest raw body snippet quoted in an error message.
const MAX_ERROR_SNIPPET: usize = 100;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Structured error body returned by the API.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Typed client for the groundcover REST API.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    auth_headers: HeaderMap,
    call_timeout: Duration,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client using the default transport stack.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::with_transport(config, default_stack(config)?)
    }

    /// Create a client sending through `transport`.
    pub fn with_transport(config: &ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self {
            transport,
            auth_headers: auth_headers(&config.api_key, &config.backend_id)?,
            call_timeout: config.call_timeout(),
        })
    }

    /// GET a JSON document.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        operation: Operation,
        resource: &str,
        path: &str,
        ctx: &CallContext,
    ) -> Result<T> {
        let request = HttpRequest::new(Method::GET, path);
        let response = self.execute(request, operation, resource, ctx).await?;
        decode(&response)
    }

    /// Send a JSON body with `method` and decode the JSON answer.
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        operation: Operation,
        resource: &str,
        path: &str,
        body: &B,
        ctx: &CallContext,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let bytes = serde_json::to_vec(body).map_err(|e| {
            ProviderError::Encode(format!("{} request for '{}': {}", operation, resource, e))
        })?;
        let mut request = HttpRequest::new(method, path).with_body(bytes);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        let response = self.execute(request, operation, resource, ctx).await?;
        decode(&response)
    }

    /// DELETE without a body, ignoring the answer.
    pub async fn delete(
        &self,
        operation: Operation,
        resource: &str,
        path: &str,
        ctx: &CallContext,
    ) -> Result<()> {
        let request = HttpRequest::new(Method::DELETE, path);
        self.execute(request, operation, resource, ctx).await?;
        Ok(())
    }

    /// GET a raw YAML document. Fails with a decode error if the server does
    /// not label the answer as YAML.
    pub async fn get_yaml(
        &self,
        operation: Operation,
        resource: &str,
        path: &str,
        ctx: &CallContext,
    ) -> Result<String> {
        let request = HttpRequest::new(Method::GET, path);
        let response = self.execute(request, operation, resource, ctx).await?;
        match response.content_type() {
            Some(ct) if is_yaml(&ct) => String::from_utf8(response.body)
                .map_err(|e| ProviderError::Decode(format!("YAML body is not UTF-8: {}", e))),
            other => Err(ProviderError::Decode(format!(
                "expected a YAML response for {}, got content type {}",
                operation,
                other.as_deref().unwrap_or("<none>")
            ))),
        }
    }

    /// Send a raw YAML document with `method` and decode the answer.
    pub async fn send_yaml<T: DeserializeOwned>(
        &self,
        method: Method,
        operation: Operation,
        resource: &str,
        path: &str,
        yaml: &str,
        ctx: &CallContext,
    ) -> Result<T> {
        let mut request = HttpRequest::new(method, path).with_body(yaml.as_bytes().to_vec());
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(YAML_CONTENT_TYPE));
        let response = self.execute(request, operation, resource, ctx).await?;
        decode(&response)
    }

    async fn execute(
        &self,
        mut request: HttpRequest,
        operation: Operation,
        resource: &str,
        ctx: &CallContext,
    ) -> Result<HttpResponse> {
        request.headers.extend(self.auth_headers.clone());

        let deadline = ctx
            .deadline()
            .or_else(|| tokio::time::Instant::now().checked_add(self.call_timeout));
        debug!(operation = %operation, resource, path = %request.path, "Calling API");

        let send = self.transport.send(&request, ctx);
        let sent = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, send).await,
            None => Ok(send.await),
        };
        let response = match sent {
            Err(_elapsed) => {
                return Err(ProviderError::DeadlineExceeded(format!(
                    "{} for '{}' did not complete in time",
                    operation, resource
                )))
            },
            Ok(Err(ProviderError::Transport(err))) => {
                return Err(ProviderError::Api {
                    operation: operation.to_string(),
                    resource: resource.to_string(),
                    message: err.to_string(),
                })
            },
            Ok(Err(other)) => return Err(other),
            Ok(Ok(response)) => response,
        };

        if response.status.is_success() {
            return Ok(response);
        }
        classify_result(Err(failure_from(&response)), operation, resource)
    }
}

fn auth_headers(api_key: &str, backend_id: &str) -> Result<HeaderMap> {
    if api_key.trim().is_empty() {
        return Err(ProviderError::Configuration(
            "API key is empty; it is required on every call".to_string(),
        ));
    }
    if backend_id.trim().is_empty() {
        return Err(ProviderError::Configuration(
            "backend id is empty; it is required on every call".to_string(),
        ));
    }

    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|_| {
        ProviderError::Configuration("API key contains characters not allowed in a header".into())
    })?;
    bearer.set_sensitive(true);
    let backend = HeaderValue::from_str(backend_id).map_err(|_| {
        ProviderError::Configuration(
            "backend id contains characters not allowed in a header".into(),
        )
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(HeaderName::from_static(BACKEND_ID_HEADER), backend);
    Ok(headers)
}

fn is_yaml(content_type: &str) -> bool {
    matches!(
        content_type,
        "application/x-yaml" | "application/yaml" | "text/yaml" | "text/x-yaml"
    )
}

/// Decode a successful response body, choosing JSON or YAML by content type.
/// An empty body decodes as `null`.
fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    let body: &[u8] = if response.body.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        &response.body
    };
    match response.content_type() {
        Some(ct) if is_yaml(&ct) => serde_yaml::from_slice(body)
            .map_err(|e| ProviderError::Decode(format!("invalid YAML: {}", e))),
        _ => serde_json::from_slice(body)
            .map_err(|e| ProviderError::Decode(format!("invalid JSON: {}", e))),
    }
}

/// Compose the failure for a non-success response.
fn failure_from(response: &HttpResponse) -> ApiFailure {
    let status = response.status;
    let detail = match serde_json::from_slice::<ErrorBody>(&response.body) {
        Ok(ErrorBody {
            error: Some(error),
            message: Some(message),
        }) => format!("{}: {}", error, message),
        Ok(ErrorBody {
            error: Some(text), ..
        })
        | Ok(ErrorBody {
            message: Some(text),
            ..
        }) => text,
        _ => snippet(&String::from_utf8_lossy(&response.body)),
    };

    let reason = status.canonical_reason().unwrap_or("Unknown Status");
    let message = if detail.is_empty() {
        format!("{} {}", status.as_u16(), reason)
    } else {
        format!("{} {}: {}", status.as_u16(), reason, detail)
    };
    ApiFailure::with_status(status.as_u16(), message)
}

fn snippet(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_SNIPPET) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Entity;
    use crate::error::ErrorKind;
    use crate::testing::{test_client_config, MockResponse, MockTransport};
    use serde_json::json;

    fn client(mock: &Arc<MockTransport>) -> ApiClient {
        ApiClient::with_transport(&test_client_config(), mock.clone()).unwrap()
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Thing {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    }

    #[tokio::test]
    async fn test_auth_headers_attached() {
        let mock = Arc::new(MockTransport::new());
        mock.push(MockResponse::json(200, json!({"name": "a"})));

        let thing: Thing = client(&mock)
            .get_json(
                Operation::read(Entity::Policy),
                "a",
                "/api/things/a",
                &CallContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(thing.name, "a");
        assert_eq!(thing.note, None);

        let sent = &mock.requests()[0];
        assert_eq!(sent.method, Method::GET);
        assert_eq!(sent.headers[AUTHORIZATION], "Bearer test-api-key");
        assert_eq!(sent.headers[BACKEND_ID_HEADER], "test-backend");
    }

    #[tokio::test]
    async fn test_send_json_body() {
        let mock = Arc::new(MockTransport::new());
        mock.push(MockResponse::json(201, json!({"name": "b", "note": "n"})));

        let thing: Thing = client(&mock)
            .send_json(
                Method::POST,
                Operation::create(Entity::Policy),
                "b",
                "/api/things",
                &Thing {
                    name: "b".to_string(),
                    note: None,
                },
                &CallContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(thing.note.as_deref(), Some("n"));

        let sent = &mock.requests()[0];
        assert_eq!(sent.headers[CONTENT_TYPE], JSON_CONTENT_TYPE);
        // Absent optional fields stay absent on the wire.
        assert_eq!(sent.body.as_deref(), Some(&br#"{"name":"b"}"#[..]));
    }

    #[test]
    fn test_missing_credentials_rejected_before_io() {
        let mut config = test_client_config();
        config.api_key = String::new();
        let mock = Arc::new(MockTransport::new());
        let err = ApiClient::with_transport(&config, mock.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let mut config = test_client_config();
        config.backend_id = "  ".to_string();
        let err = ApiClient::with_transport(&config, mock.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(mock.request_count(), 0);

        let mut config = test_client_config();
        config.backend_id = "bad\nvalue".to_string();
        assert!(ApiClient::with_transport(&config, mock).is_err());
    }

    #[tokio::test]
    async fn test_structured_error_body() {
        let mock = Arc::new(MockTransport::new());
        mock.push(MockResponse::json(
            409,
            json!({"error": "conflict", "message": "name taken"}),
        ));

        let err = client(&mock)
            .send_json::<_, Thing>(
                Method::POST,
                Operation::create(Entity::Policy),
                "dup-policy",
                "/api/rbac/policy/create",
                &json!({"name": "dup-policy"}),
                &CallContext::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(err.to_string().contains("dup-policy"));
    }

    #[tokio::test]
    async fn test_unstructured_error_body_truncated() {
        let mock = Arc::new(MockTransport::new());
        let long = "x".repeat(500);
        mock.push(MockResponse::raw(500, long.as_str(), Some("text/plain")));

        let err = client(&mock)
            .get_json::<Thing>(
                Operation::read(Entity::Silence),
                "s-1",
                "/api/monitors/silences/s-1",
                &CallContext::new(),
            )
            .await
            .unwrap_err();
        match err {
            ProviderError::Api {
                operation, message, ..
            } => {
                assert_eq!(operation, "read silence");
                assert!(message.starts_with("500 Internal Server Error: "));
                assert!(message.len() < 160);
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_classified() {
        let mock = Arc::new(MockTransport::new());
        mock.push(MockResponse::json(404, json!({"message": "no such policy"})));

        let err = client(&mock)
            .get_json::<Thing>(
                Operation::read(Entity::Policy),
                "missing-id",
                "/api/rbac/policy/missing-id",
                &CallContext::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_malformed_response_is_decode_error() {
        let mock = Arc::new(MockTransport::new());
        mock.push(MockResponse::raw(200, "{not json", Some("application/json")));

        let err = client(&mock)
            .get_json::<Thing>(
                Operation::read(Entity::Policy),
                "p",
                "/api/rbac/policy/p",
                &CallContext::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test]
    async fn test_empty_body_decodes_as_unit() {
        let mock = Arc::new(MockTransport::new());
        mock.push(MockResponse::raw(204, "", None));

        client(&mock)
            .send_json::<_, ()>(
                Method::PUT,
                Operation::update(Entity::ServiceAccount),
                "sa",
                "/api/rbac/service-account/update",
                &json!({}),
                &CallContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_yaml_roundtrip_and_content_type_check() {
        let mock = Arc::new(MockTransport::new());
        mock.push(MockResponse::raw(200, "a: 1\n", Some(YAML_CONTENT_TYPE)));
        mock.push(MockResponse::raw(200, "a: 1\n", Some("application/json")));
        mock.push(MockResponse::json(200, json!({"updated": true})));

        let client = client(&mock);
        let ctx = CallContext::new();
        let op = Operation::read(Entity::MetricsAggregation);
        let path = "/api/metrics/aggregations/config";

        assert_eq!(client.get_yaml(op, "m", path, &ctx).await.unwrap(), "a: 1\n");
        let err = client.get_yaml(op, "m", path, &ctx).await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));

        let ack: serde_json::Value = client
            .send_yaml(
                Method::POST,
                Operation::create(Entity::MetricsAggregation),
                "m",
                path,
                "a: 2\n",
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(ack["updated"], true);
        let sent = &mock.requests()[2];
        assert_eq!(sent.headers[CONTENT_TYPE], YAML_CONTENT_TYPE);
        assert_eq!(sent.body.as_deref(), Some(&b"a: 2\n"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let mock = Arc::new(MockTransport::new());
        mock.push(MockResponse::json(200, json!({})).delayed(Duration::from_secs(30)));

        let ctx = CallContext::new().with_timeout(Duration::from_secs(1));
        let err = client(&mock)
            .delete(
                Operation::delete(Entity::Dashboard),
                "d",
                "/api/dashboards/d",
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert!(err.to_string().contains("delete dashboard"));
    }

    #[tokio::test]
    async fn test_unbounded_call_budget_still_sends() {
        let mock = Arc::new(MockTransport::new());
        mock.push(MockResponse::json(200, json!({"name": "a"})));

        let mut config = test_client_config();
        config.request_timeout = Duration::MAX;
        let client = ApiClient::with_transport(&config, mock.clone()).unwrap();
        let thing: Thing = client
            .get_json(
                Operation::read(Entity::Policy),
                "a",
                "/api/things/a",
                &CallContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(thing.name, "a");
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let text = "é".repeat(150);
        let cut = snippet(&text);
        assert_eq!(cut.chars().count(), MAX_ERROR_SNIPPET + 3);
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn test_failure_from_message_only() {
        let response = HttpResponse::new(
            reqwest::StatusCode::BAD_REQUEST,
            br#"{"message":"bad field"}"#.to_vec(),
        );
        let failure = failure_from(&response);
        assert_eq!(failure.status, Some(400));
        assert_eq!(failure.message, "400 Bad Request: bad field");
    }
}
