//! `groundcover_apikey`: API keys issued to service accounts.
//!
//! Keys are immutable: every input forces replacement, and the secret is only
//! returned by the create call, so it is carried over from state on refresh.
//! A revoked key is reported as gone.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::{
    absent_if_not_found, decode_state, encode_state, ignore_not_found, optional_text,
    reconcile_timestamp, require_id, Resource,
};
use crate::classify::{Entity, Operation};
use crate::client::ApiClient;
use crate::error::Result;
use crate::schema::{Attribute, Schema, StringValidator};
use crate::transport::CallContext;

const TYPE_NAME: &str = "groundcover_apikey";
const CREATE_PATH: &str = "/api/rbac/apikey/create";

fn key_path(id: &str) -> String {
    format!("/api/rbac/apikey/{}", id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ApiKeyState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    service_account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiration_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    creation_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
    name: &'a str,
    service_account_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration_date: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    id: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKey {
    id: String,
    name: String,
    service_account_id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    expiration_date: Option<String>,
    #[serde(default)]
    creation_date: Option<String>,
    #[serde(default)]
    revoked_at: Option<String>,
}

/// Adapter for API keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiKeyResource;

#[async_trait]
impl Resource for ApiKeyResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("An API key for a service account. Changing any input replaces the key.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_validator(StringValidator::NotEmpty)
                    .with_force_new(),
            )
            .with_attribute(
                "service_account_id",
                Attribute::required_string().with_force_new(),
            )
            .with_attribute("description", Attribute::optional_string().with_force_new())
            .with_attribute(
                "expiration_date",
                Attribute::optional_string()
                    .with_validator(StringValidator::Rfc3339)
                    .with_force_new(),
            )
            .with_attribute(
                "api_key",
                Attribute::computed_string()
                    .sensitive()
                    .with_description("The secret. Only known to the run that created the key."),
            )
            .with_attribute("creation_date", Attribute::computed_string())
    }

    async fn create(&self, client: &ApiClient, planned: Value, ctx: &CallContext) -> Result<Value> {
        let mut state: ApiKeyState = decode_state(TYPE_NAME, planned)?;
        let created: CreateResponse = client
            .send_json(
                Method::POST,
                Operation::create(Entity::ApiKey),
                &state.name,
                CREATE_PATH,
                &CreateRequest {
                    name: &state.name,
                    service_account_id: &state.service_account_id,
                    description: state.description.as_deref(),
                    expiration_date: state.expiration_date.as_deref(),
                },
                ctx,
            )
            .await
            .map_err(|e| e.with_conflicting_attribute("name"))?;
        state.id = Some(created.id);
        state.api_key = Some(created.api_key);
        encode_state(&state)
    }

    async fn read(
        &self,
        client: &ApiClient,
        current: Value,
        ctx: &CallContext,
    ) -> Result<Option<Value>> {
        let state: ApiKeyState = decode_state(TYPE_NAME, current)?;
        let id = require_id(TYPE_NAME, &state.id)?;
        let fetched = absent_if_not_found(
            client
                .get_json::<ApiKey>(Operation::read(Entity::ApiKey), id, &key_path(id), ctx)
                .await,
        )?;
        let Some(key) = fetched else {
            return Ok(None);
        };
        if key.revoked_at.as_deref().is_some_and(|at| !at.is_empty()) {
            return Ok(None);
        }

        let refreshed = ApiKeyState {
            id: Some(key.id),
            name: key.name,
            service_account_id: key.service_account_id,
            description: optional_text(state.description.as_deref(), key.description),
            expiration_date: reconcile_timestamp(
                state.expiration_date.as_deref(),
                key.expiration_date.filter(|d| !d.is_empty()),
            ),
            api_key: state.api_key.clone(),
            creation_date: key.creation_date,
        };
        encode_state(&refreshed).map(Some)
    }

    async fn update(
        &self,
        _client: &ApiClient,
        prior: Value,
        planned: Value,
        _ctx: &CallContext,
    ) -> Result<Value> {
        let prior: ApiKeyState = decode_state(TYPE_NAME, prior)?;
        let mut planned: ApiKeyState = decode_state(TYPE_NAME, planned)?;
        warn!(
            resource_type = TYPE_NAME,
            id = ?prior.id,
            "API keys cannot be updated in place; keeping the existing key"
        );
        planned.id = prior.id;
        planned.api_key = prior.api_key;
        planned.creation_date = prior.creation_date;
        encode_state(&planned)
    }

    async fn delete(&self, client: &ApiClient, current: Value, ctx: &CallContext) -> Result<()> {
        let state: ApiKeyState = decode_state(TYPE_NAME, current)?;
        let id = require_id(TYPE_NAME, &state.id)?;
        ignore_not_found(
            client
                .delete(Operation::delete(Entity::ApiKey), id, &key_path(id), ctx)
                .await,
        )
    }
}
