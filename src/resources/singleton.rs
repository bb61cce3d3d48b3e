//! Singleton YAML configurations: the logs pipeline and metrics aggregation.
//!
//! Each backend has exactly one of these documents. Create and update both
//! replace it, delete resets it, and refresh keeps the user's text when the
//! server's rendering is the same YAML.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{absent_if_not_found, decode_state, encode_state, ignore_not_found, Resource};
use crate::classify::{Entity, Operation};
use crate::client::ApiClient;
use crate::error::Result;
use crate::json_diff::{reconcile_yaml, yaml_equivalent};
use crate::schema::{Attribute, Schema, StringValidator};
use crate::transport::CallContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct YamlConfigState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    value: String,
}

/// Adapter for a backend-wide YAML document.
#[derive(Debug, Clone, Copy)]
pub struct YamlConfigResource {
    type_name: &'static str,
    id: &'static str,
    entity: Entity,
    path: &'static str,
    description: &'static str,
}

impl YamlConfigResource {
    /// The logs pipeline configuration.
    pub const fn logs_pipeline() -> Self {
        Self {
            type_name: "groundcover_logspipeline",
            id: "logs-pipeline",
            entity: Entity::LogsPipeline,
            path: "/api/pipelines/logs/config",
            description: "The logs pipeline configuration. There is one per backend.",
        }
    }

    /// The metrics aggregation configuration.
    pub const fn metrics_aggregation() -> Self {
        Self {
            type_name: "groundcover_metricsaggregation",
            id: "metrics-aggregation",
            entity: Entity::MetricsAggregation,
            path: "/api/metrics/aggregations/config",
            description: "The metrics aggregation configuration. There is one per backend.",
        }
    }

    async fn write(
        &self,
        client: &ApiClient,
        operation: Operation,
        planned: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        let mut state: YamlConfigState = decode_state(self.type_name, planned)?;
        client
            .send_yaml::<IgnoredAny>(Method::POST, operation, self.id, self.path, &state.value, ctx)
            .await?;
        state.id = Some(self.id.to_string());
        encode_state(&state)
    }
}

#[async_trait]
impl Resource for YamlConfigResource {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(self.description)
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "value",
                Attribute::required_string()
                    .with_validator(StringValidator::Yaml)
                    .with_description("The configuration as a YAML document."),
            )
    }

    fn import_state(&self, _id: &str) -> Result<Value> {
        Ok(json!({"id": self.id}))
    }

    async fn create(&self, client: &ApiClient, planned: Value, ctx: &CallContext) -> Result<Value> {
        self.write(client, Operation::create(self.entity), planned, ctx)
            .await
    }

    async fn read(
        &self,
        client: &ApiClient,
        current: Value,
        ctx: &CallContext,
    ) -> Result<Option<Value>> {
        let state: YamlConfigState = decode_state(self.type_name, current)?;
        let fetched = absent_if_not_found(
            client
                .get_yaml(Operation::read(self.entity), self.id, self.path, ctx)
                .await,
        )?;
        let remote = match fetched {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Ok(None),
        };
        let prior = (!state.value.is_empty()).then_some(state.value.as_str());
        encode_state(&YamlConfigState {
            id: Some(self.id.to_string()),
            value: reconcile_yaml(prior, &remote),
        })
        .map(Some)
    }

    async fn update(
        &self,
        client: &ApiClient,
        _prior: Value,
        planned: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        self.write(client, Operation::update(self.entity), planned, ctx)
            .await
    }

    async fn delete(&self, client: &ApiClient, _current: Value, ctx: &CallContext) -> Result<()> {
        ignore_not_found(
            client
                .delete(Operation::delete(self.entity), self.id, self.path, ctx)
                .await,
        )
    }

    fn reconcile_plan(&self, prior: &Value, mut planned: Value) -> Value {
        if let (Some(old), Some(new)) = (
            prior.get("value").and_then(Value::as_str),
            planned.get("value").and_then(Value::as_str),
        ) {
            if old != new && yaml_equivalent(old, new) {
                planned["value"] = Value::String(old.to_string());
            }
        }
        planned
    }
}
