//! `groundcover_dataintegration`: data source configurations, keyed by
//! integration type.
//!
//! The type is part of every path, so imports take `<type>:<id>`.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    absent_if_not_found, decode_state, encode_state, ignore_not_found, optional_text,
    parse_import_id, path_segment, require_id, Resource,
};
use crate::classify::{Entity, Operation};
use crate::client::ApiClient;
use crate::error::Result;
use crate::schema::{Attribute, Schema, StringValidator};
use crate::transport::CallContext;
use crate::value::DynamicValue;

const TYPE_NAME: &str = "groundcover_dataintegration";

fn collection_path(kind: &str) -> Result<String> {
    Ok(format!(
        "/api/integrations/v1/data-sources/{}/config",
        path_segment(kind)?
    ))
}

fn integration_path(kind: &str, id: &str) -> Result<String> {
    Ok(format!("{}/{}", collection_path(kind)?, id))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DataIntegrationState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cluster: Option<String>,
    #[serde(default)]
    config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct DataIntegrationRequest<'a> {
    config: DynamicValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    cluster: Option<&'a str>,
}

impl<'a> DataIntegrationRequest<'a> {
    fn from_state(state: &'a DataIntegrationState) -> Result<Self> {
        let config = DynamicValue::map_from_json(&state.config)?.unwrap_or_default();
        Ok(Self {
            config: DynamicValue::Map(config),
            cluster: state.cluster.as_deref(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataIntegration {
    id: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    cluster: Option<String>,
    #[serde(default)]
    config: Value,
    #[serde(default)]
    update_timestamp: Option<String>,
}

impl DataIntegration {
    fn into_state(self, prior: &DataIntegrationState) -> Result<DataIntegrationState> {
        let config = match DynamicValue::map_from_json(&self.config)? {
            Some(map) => DynamicValue::map_to_json(&map),
            None => prior.config.clone(),
        };
        Ok(DataIntegrationState {
            id: Some(self.id),
            kind: self.kind.unwrap_or_else(|| prior.kind.clone()),
            cluster: optional_text(prior.cluster.as_deref(), self.cluster),
            config,
            updated_at: self.update_timestamp,
        })
    }
}

/// Adapter for data integrations.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataIntegrationResource;

#[async_trait]
impl Resource for DataIntegrationResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A data source integration, e.g. a cloud metrics scraper.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "type",
                Attribute::required_string()
                    .with_validator(StringValidator::NotEmpty)
                    .with_force_new(),
            )
            .with_attribute("cluster", Attribute::optional_string().with_force_new())
            .with_attribute(
                "config",
                Attribute::required_dynamic().with_description("Integration settings."),
            )
            .with_attribute("updated_at", Attribute::computed_string())
    }

    fn import_state(&self, id: &str) -> Result<Value> {
        let (kind, id) = parse_import_id(id)?;
        Ok(json!({"type": kind, "id": id}))
    }

    async fn create(&self, client: &ApiClient, planned: Value, ctx: &CallContext) -> Result<Value> {
        let state: DataIntegrationState = decode_state(TYPE_NAME, planned)?;
        let created: DataIntegration = client
            .send_json(
                Method::POST,
                Operation::create(Entity::DataIntegration),
                &state.kind,
                &collection_path(&state.kind)?,
                &DataIntegrationRequest::from_state(&state)?,
                ctx,
            )
            .await?;
        encode_state(&created.into_state(&state)?)
    }

    async fn read(
        &self,
        client: &ApiClient,
        current: Value,
        ctx: &CallContext,
    ) -> Result<Option<Value>> {
        let state: DataIntegrationState = decode_state(TYPE_NAME, current)?;
        let id = require_id(TYPE_NAME, &state.id)?;
        let fetched = absent_if_not_found(
            client
                .get_json::<DataIntegration>(
                    Operation::read(Entity::DataIntegration),
                    id,
                    &integration_path(&state.kind, id)?,
                    ctx,
                )
                .await,
        )?;
        match fetched {
            Some(integration) => encode_state(&integration.into_state(&state)?).map(Some),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        client: &ApiClient,
        prior: Value,
        planned: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        let prior: DataIntegrationState = decode_state(TYPE_NAME, prior)?;
        let planned: DataIntegrationState = decode_state(TYPE_NAME, planned)?;
        let id = require_id(TYPE_NAME, &prior.id)?;
        let updated: DataIntegration = client
            .send_json(
                Method::PUT,
                Operation::update(Entity::DataIntegration),
                id,
                &integration_path(&prior.kind, id)?,
                &DataIntegrationRequest::from_state(&planned)?,
                ctx,
            )
            .await?;
        encode_state(&updated.into_state(&planned)?)
    }

    async fn delete(&self, client: &ApiClient, current: Value, ctx: &CallContext) -> Result<()> {
        let state: DataIntegrationState = decode_state(TYPE_NAME, current)?;
        let id = require_id(TYPE_NAME, &state.id)?;
        ignore_not_found(
            client
                .delete(
                    Operation::delete(Entity::DataIntegration),
                    id,
                    &integration_path(&state.kind, id)?,
                    ctx,
                )
                .await,
        )
    }
}
