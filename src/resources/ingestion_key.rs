//! `groundcover_ingestionkey`: keys sensors and third-party shippers use to
//! send data.
//!
//! Ingestion keys are addressed by name. There is no GET by name, so refresh
//! lists with a name filter and picks the exact match. Keys are immutable.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::{
    absent_if_not_found, decode_state, encode_state, ignore_not_found, path_segment, Resource,
};
use crate::classify::{Entity, Operation};
use crate::client::ApiClient;
use crate::error::Result;
use crate::schema::{Attribute, Schema, StringValidator};
use crate::transport::CallContext;

const TYPE_NAME: &str = "groundcover_ingestionkey";
const CREATE_PATH: &str = "/api/rbac/ingestion-keys/create";
const LIST_PATH: &str = "/api/rbac/ingestion-keys/list";
const DELETE_PATH: &str = "/api/rbac/ingestion-keys/delete";

/// Accepted values of `type`.
const KEY_TYPES: &[&str] = &["sensor", "thirdParty", "rum"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IngestionKeyState {
    name: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_config: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    creation_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_config: Option<bool>,
}

#[derive(Debug, Serialize)]
struct NameFilter<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestionKey {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    remote_config: Option<bool>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    creation_date: Option<String>,
}

impl IngestionKey {
    fn into_state(self, prior: &IngestionKeyState) -> IngestionKeyState {
        // An empty tag list the user never wrote stays absent.
        let tags = match (self.tags, &prior.tags) {
            (Some(tags), None) if tags.is_empty() => None,
            (tags, _) => tags,
        };
        let remote_config = match (self.remote_config, prior.remote_config) {
            (Some(false), None) => None,
            (remote, _) => remote,
        };
        IngestionKeyState {
            name: self.name,
            kind: self.kind,
            tags,
            remote_config,
            key: self.key.filter(|k| !k.is_empty()).or_else(|| prior.key.clone()),
            creation_date: self.creation_date,
        }
    }
}

/// Adapter for ingestion keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestionKeyResource;

#[async_trait]
impl Resource for IngestionKeyResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("An ingestion key. Changing any input replaces the key.")
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_validator(StringValidator::NotEmpty)
                    .with_force_new(),
            )
            .with_attribute(
                "type",
                Attribute::required_string()
                    .with_validator(StringValidator::one_of(KEY_TYPES))
                    .with_force_new(),
            )
            .with_attribute("tags", Attribute::optional_string_list().with_force_new())
            .with_attribute("remote_config", Attribute::optional_bool().with_force_new())
            .with_attribute("key", Attribute::computed_string().sensitive())
            .with_attribute("creation_date", Attribute::computed_string())
    }

    fn id_attribute(&self) -> &'static str {
        "name"
    }

    async fn create(&self, client: &ApiClient, planned: Value, ctx: &CallContext) -> Result<Value> {
        let state: IngestionKeyState = decode_state(TYPE_NAME, planned)?;
        path_segment(&state.name)?;
        let created: IngestionKey = client
            .send_json(
                Method::POST,
                Operation::create(Entity::IngestionKey),
                &state.name,
                CREATE_PATH,
                &CreateRequest {
                    name: &state.name,
                    kind: &state.kind,
                    tags: state.tags.as_deref(),
                    remote_config: state.remote_config,
                },
                ctx,
            )
            .await
            .map_err(|e| e.with_conflicting_attribute("name"))?;
        encode_state(&created.into_state(&state))
    }

    async fn read(
        &self,
        client: &ApiClient,
        current: Value,
        ctx: &CallContext,
    ) -> Result<Option<Value>> {
        // Imports only know the name.
        let state: IngestionKeyState = decode_state(TYPE_NAME, current)?;
        path_segment(&state.name)?;

        let listed = absent_if_not_found(
            client
                .send_json::<_, Vec<IngestionKey>>(
                    Method::POST,
                    Operation::list(Entity::IngestionKey),
                    &state.name,
                    LIST_PATH,
                    &NameFilter { name: &state.name },
                    ctx,
                )
                .await,
        )?;
        let Some(found) = listed
            .into_iter()
            .flatten()
            .find(|k| k.name == state.name)
        else {
            return Ok(None);
        };
        encode_state(&found.into_state(&state)).map(Some)
    }

    async fn update(
        &self,
        _client: &ApiClient,
        prior: Value,
        planned: Value,
        _ctx: &CallContext,
    ) -> Result<Value> {
        let prior: IngestionKeyState = decode_state(TYPE_NAME, prior)?;
        let mut planned: IngestionKeyState = decode_state(TYPE_NAME, planned)?;
        warn!(
            resource_type = TYPE_NAME,
            name = %prior.name,
            "Ingestion keys cannot be updated in place; keeping the existing key"
        );
        planned.key = prior.key;
        planned.creation_date = prior.creation_date;
        encode_state(&planned)
    }

    async fn delete(&self, client: &ApiClient, current: Value, ctx: &CallContext) -> Result<()> {
        let state: IngestionKeyState = decode_state(TYPE_NAME, current)?;
        path_segment(&state.name)?;
        ignore_not_found(
            client
                .send_json::<_, IgnoredAny>(
                    Method::DELETE,
                    Operation::delete(Entity::IngestionKey),
                    &state.name,
                    DELETE_PATH,
                    &NameFilter { name: &state.name },
                    ctx,
                )
                .await
                .map(|_| ()),
        )
    }
}
