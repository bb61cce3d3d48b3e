//! `groundcover_connectedapp`: notification targets such as Slack webhooks.
//!
//! `data` is free-form and usually holds secrets. The API may leave it out of
//! read responses, in which case the stored value is kept.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{absent_if_not_found, decode_state, encode_state, ignore_not_found, require_id, Resource};
use crate::classify::{Entity, Operation};
use crate::client::ApiClient;
use crate::error::Result;
use crate::schema::{Attribute, Schema, StringValidator};
use crate::transport::CallContext;
use crate::value::DynamicValue;

const TYPE_NAME: &str = "groundcover_connectedapp";
const COLLECTION_PATH: &str = "/api/connected-apps";

fn app_path(id: &str) -> String {
    format!("{}/{}", COLLECTION_PATH, id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ConnectedAppState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    app_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConnectedAppRequest<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    app_type: &'a str,
    data: BTreeMap<String, DynamicValue>,
}

impl<'a> ConnectedAppRequest<'a> {
    fn from_state(state: &'a ConnectedAppState) -> Result<Self> {
        Ok(Self {
            name: &state.name,
            app_type: &state.app_type,
            data: DynamicValue::map_from_json(&state.data)?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedApp {
    id: String,
    name: String,
    #[serde(rename = "type")]
    app_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

impl ConnectedApp {
    fn into_state(self, prior: &ConnectedAppState) -> Result<ConnectedAppState> {
        let data = match DynamicValue::map_from_json(&self.data)? {
            Some(map) => DynamicValue::map_to_json(&map),
            None => prior.data.clone(),
        };
        Ok(ConnectedAppState {
            id: Some(self.id),
            name: self.name,
            app_type: self.app_type,
            data,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Adapter for connected apps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectedAppResource;

#[async_trait]
impl Resource for ConnectedAppResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A connected app that receives notifications.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string().with_validator(StringValidator::NotEmpty),
            )
            .with_attribute(
                "type",
                Attribute::required_string()
                    .with_validator(StringValidator::NotEmpty)
                    .with_force_new()
                    .with_description("App kind, e.g. slack-webhook or pagerduty."),
            )
            .with_attribute(
                "data",
                Attribute::required_dynamic()
                    .sensitive()
                    .with_description("App settings, e.g. the webhook URL."),
            )
            .with_attribute("created_at", Attribute::computed_string())
            .with_attribute("updated_at", Attribute::computed_string())
    }

    async fn create(&self, client: &ApiClient, planned: Value, ctx: &CallContext) -> Result<Value> {
        let state: ConnectedAppState = decode_state(TYPE_NAME, planned)?;
        let created: ConnectedApp = client
            .send_json(
                Method::POST,
                Operation::create(Entity::ConnectedApp),
                &state.name,
                COLLECTION_PATH,
                &ConnectedAppRequest::from_state(&state)?,
                ctx,
            )
            .await
            .map_err(|e| e.with_conflicting_attribute("name"))?;
        encode_state(&created.into_state(&state)?)
    }

    async fn read(
        &self,
        client: &ApiClient,
        current: Value,
        ctx: &CallContext,
    ) -> Result<Option<Value>> {
        let state: ConnectedAppState = decode_state(TYPE_NAME, current)?;
        let id = require_id(TYPE_NAME, &state.id)?;
        let fetched = absent_if_not_found(
            client
                .get_json::<ConnectedApp>(
                    Operation::read(Entity::ConnectedApp),
                    id,
                    &app_path(id),
                    ctx,
                )
                .await,
        )?;
        match fetched {
            Some(app) => encode_state(&app.into_state(&state)?).map(Some),
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
        let prior: ConnectedAppState = decode_state(TYPE_NAME, prior)?;
        let planned: ConnectedAppState = decode_state(TYPE_NAME, planned)?;
        let id = require_id(TYPE_NAME, &prior.id)?;
        let updated: ConnectedApp = client
            .send_json(
                Method::PUT,
                Operation::update(Entity::ConnectedApp),
                id,
                &app_path(id),
                &ConnectedAppRequest::from_state(&planned)?,
                ctx,
            )
            .await?;
        encode_state(&updated.into_state(&planned)?)
    }

    async fn delete(&self, client: &ApiClient, current: Value, ctx: &CallContext) -> Result<()> {
        let state: ConnectedAppState = decode_state(TYPE_NAME, current)?;
        let id = require_id(TYPE_NAME, &state.id)?;
        ignore_not_found(
            client
                .delete(Operation::delete(Entity::ConnectedApp), id, &app_path(id), ctx)
                .await,
        )
    }
}
