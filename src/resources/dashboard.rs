//! `groundcover_dashboard`: dashboards defined by a JSON preset.
//!
//! The API reformats presets, so the stored text is only replaced when the
//! document actually differs. Updates are optimistic: the current revision is
//! fetched first and sent back, and the answer must carry a newer revision.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    absent_if_not_found, decode_state, encode_state, ignore_not_found, optional_text, require_id,
    Resource,
};
use crate::classify::{Entity, Operation};
use crate::client::ApiClient;
use crate::error::{ProviderError, Result};
use crate::json_diff::{json_equivalent, reconcile_json};
use crate::schema::{Attribute, Schema, StringValidator};
use crate::transport::CallContext;

const TYPE_NAME: &str = "groundcover_dashboard";
const COLLECTION_PATH: &str = "/api/dashboards";

fn dashboard_path(uuid: &str) -> String {
    format!("{}/{}", COLLECTION_PATH, uuid)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DashboardState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    team: Option<String>,
    #[serde(default)]
    preset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revision_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    team: Option<&'a str>,
    preset: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_revision: Option<i64>,
}

impl<'a> DashboardRequest<'a> {
    fn from_state(state: &'a DashboardState) -> Self {
        Self {
            name: &state.name,
            description: state.description.as_deref(),
            team: state.team.as_deref(),
            preset: &state.preset,
            current_revision: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Dashboard {
    uuid: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    preset: String,
    #[serde(default)]
    revision_number: Option<i64>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl Dashboard {
    fn into_state(self, prior: &DashboardState) -> DashboardState {
        DashboardState {
            uuid: Some(self.uuid),
            name: self.name,
            description: optional_text(prior.description.as_deref(), self.description),
            team: optional_text(prior.team.as_deref(), self.team),
            preset: reconcile_json(Some(&prior.preset), &self.preset),
            revision_number: self.revision_number,
            owner: self.owner,
            status: self.status,
        }
    }
}

/// Adapter for dashboards.
#[derive(Debug, Clone, Copy, Default)]
pub struct DashboardResource;

#[async_trait]
impl Resource for DashboardResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A dashboard.")
            .with_attribute("uuid", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string().with_validator(StringValidator::NotEmpty),
            )
            .with_attribute("description", Attribute::optional_string())
            .with_attribute("team", Attribute::optional_string())
            .with_attribute(
                "preset",
                Attribute::required_string()
                    .with_validator(StringValidator::Json)
                    .with_description("Dashboard layout as a JSON document."),
            )
            .with_attribute("revision_number", Attribute::computed_int64())
            .with_attribute("owner", Attribute::computed_string())
            .with_attribute("status", Attribute::computed_string())
    }

    fn id_attribute(&self) -> &'static str {
        "uuid"
    }

    async fn create(&self, client: &ApiClient, planned: Value, ctx: &CallContext) -> Result<Value> {
        let state: DashboardState = decode_state(TYPE_NAME, planned)?;
        let created: Dashboard = client
            .send_json(
                Method::POST,
                Operation::create(Entity::Dashboard),
                &state.name,
                COLLECTION_PATH,
                &DashboardRequest::from_state(&state),
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
        let state: DashboardState = decode_state(TYPE_NAME, current)?;
        let uuid = require_id(TYPE_NAME, &state.uuid)?;
        let fetched = absent_if_not_found(
            client
                .get_json::<Dashboard>(
                    Operation::read(Entity::Dashboard),
                    uuid,
                    &dashboard_path(uuid),
                    ctx,
                )
                .await,
        )?;
        fetched
            .map(|dashboard| encode_state(&dashboard.into_state(&state)))
            .transpose()
    }

    async fn update(
        &self,
        client: &ApiClient,
        prior: Value,
        planned: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        let prior: DashboardState = decode_state(TYPE_NAME, prior)?;
        let planned: DashboardState = decode_state(TYPE_NAME, planned)?;
        let uuid = require_id(TYPE_NAME, &prior.uuid)?;
        let path = dashboard_path(uuid);

        let current: Dashboard = client
            .get_json(Operation::read(Entity::Dashboard), uuid, &path, ctx)
            .await?;
        let sent_revision = current.revision_number;
        debug!(uuid, revision = ?sent_revision, "Updating dashboard");

        let mut request = DashboardRequest::from_state(&planned);
        request.current_revision = sent_revision;
        let updated: Dashboard = client
            .send_json(
                Method::PUT,
                Operation::update(Entity::Dashboard),
                uuid,
                &path,
                &request,
                ctx,
            )
            .await?;

        if let (Some(sent), Some(received)) = (sent_revision, updated.revision_number) {
            if received <= sent {
                return Err(ProviderError::FailedPrecondition(format!(
                    "dashboard '{}' update was not applied: revision stayed at {} (expected > {})",
                    uuid, received, sent
                )));
            }
        }
        encode_state(&updated.into_state(&planned))
    }

    async fn delete(&self, client: &ApiClient, current: Value, ctx: &CallContext) -> Result<()> {
        let state: DashboardState = decode_state(TYPE_NAME, current)?;
        let uuid = require_id(TYPE_NAME, &state.uuid)?;
        ignore_not_found(
            client
                .delete(Operation::delete(Entity::Dashboard), uuid, &dashboard_path(uuid), ctx)
                .await,
        )
    }

    fn reconcile_plan(&self, prior: &Value, mut planned: Value) -> Value {
        if let (Some(old), Some(new)) = (
            prior.get("preset").and_then(Value::as_str),
            planned.get("preset").and_then(Value::as_str),
        ) {
            if old != new && json_equivalent(old, new) {
                planned["preset"] = Value::String(old.to_string());
            }
        }
        planned
    }
}
