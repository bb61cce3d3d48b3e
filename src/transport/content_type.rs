//! Content-type correction for endpoints that mislabel their responses.
//!
//! The logs pipeline config endpoint answers GET with a YAML document but
//! without a YAML content type. The codec picks a decoder from the content
//! type, so the header is fixed up here before the response leaves the
//! transport stack.

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use tracing::debug;

use super::{CallContext, HttpRequest, HttpResponse, Transport};
use crate::error::{ProviderError, Result};

/// Content type used for YAML request and response bodies.
pub const YAML_CONTENT_TYPE: &str = "application/x-yaml";

/// Path of the logs pipeline configuration, which needs the fix.
const LOGS_PIPELINE_CONFIG_PATH: &str = r"^/api/pipelines/logs/config/?(\?.*)?$";

/// Forces a content type on successful GET responses whose path matches.
#[derive(Debug, Clone)]
pub struct ContentTypeRule {
    path: Regex,
    content_type: &'static str,
}

impl ContentTypeRule {
    /// Create a rule from a path regex.
    pub fn new(path_pattern: &str, content_type: &'static str) -> Result<Self> {
        let path = Regex::new(path_pattern).map_err(|e| {
            ProviderError::Configuration(format!(
                "invalid content-type rule pattern '{}': {}",
                path_pattern, e
            ))
        })?;
        Ok(Self { path, content_type })
    }

    fn applies(&self, request: &HttpRequest, response: &HttpResponse) -> bool {
        request.method == Method::GET
            && response.status.is_success()
            && self.path.is_match(&request.path)
            && response
                .content_type()
                .map_or(true, |current| current != self.content_type)
    }
}

/// Decorator applying [`ContentTypeRule`]s.
#[derive(Debug, Clone)]
pub struct ContentTypeFix<T> {
    inner: T,
    rules: Vec<ContentTypeRule>,
}

impl<T> ContentTypeFix<T> {
    /// Wrap `inner` with explicit rules.
    pub fn new(inner: T, rules: Vec<ContentTypeRule>) -> Self {
        Self { inner, rules }
    }

    /// Wrap `inner` with the rules the groundcover API needs.
    pub fn with_default_rules(inner: T) -> Self {
        let rules = ContentTypeRule::new(LOGS_PIPELINE_CONFIG_PATH, YAML_CONTENT_TYPE)
            .into_iter()
            .collect();
        Self::new(inner, rules)
    }
}

#[async_trait]
impl<T: Transport> Transport for ContentTypeFix<T> {
    async fn send(&self, request: &HttpRequest, ctx: &CallContext) -> Result<HttpResponse> {
        let mut response = self.inner.send(request, ctx).await?;
        if let Some(rule) = self.rules.iter().find(|r| r.applies(request, &response)) {
            debug!(
                path = %request.path,
                from = ?response.content_type(),
                to = rule.content_type,
                "Correcting response content type"
            );
            response
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(rule.content_type));
        }
        Ok(response)
    }
}
