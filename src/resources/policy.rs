//! `groundcover_policy`: RBAC policies.
//!
//! Policies carry a revision number. Updates send the revision the user last
//! saw as `currentRevision`, and the API answers 409 when somebody else
//! changed the policy in between, which surfaces as
//! [`ProviderError::Conflict`](crate::ProviderError::Conflict).

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    absent_if_not_found, decode_state, encode_state, ignore_not_found, optional_text, require_id,
    Resource,
};
use crate::classify::{Entity, Operation};
use crate::client::ApiClient;
use crate::error::Result;
use crate::schema::{Attribute, Schema, StringValidator};
use crate::transport::CallContext;
use crate::value::DynamicValue;

const TYPE_NAME: &str = "groundcover_policy";
const CREATE_PATH: &str = "/api/rbac/policy/create";

fn policy_path(uuid: &str) -> String {
    format!("/api/rbac/policy/{}", uuid)
}

/// Policy state as stored by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PolicyState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    role: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_scope: Option<DynamicValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claim_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revision_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    read_only: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    role: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_scope: Option<&'a DynamicValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    claim_role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_revision: Option<i64>,
}

impl<'a> PolicyRequest<'a> {
    fn from_state(state: &'a PolicyState) -> Self {
        Self {
            name: &state.name,
            description: state.description.as_deref(),
            role: &state.role,
            data_scope: state.data_scope.as_ref(),
            claim_role: state.claim_role.as_deref(),
            current_revision: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Policy {
    uuid: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    role: BTreeMap<String, String>,
    #[serde(default)]
    data_scope: Option<DynamicValue>,
    #[serde(default)]
    claim_role: Option<String>,
    #[serde(default)]
    revision_number: Option<i64>,
    #[serde(default)]
    read_only: Option<bool>,
}

impl Policy {
    fn into_state(self, prior: &PolicyState) -> PolicyState {
        PolicyState {
            uuid: Some(self.uuid),
            name: self.name,
            description: optional_text(prior.description.as_deref(), self.description),
            role: self.role,
            data_scope: optional_scope(prior.data_scope.as_ref(), self.data_scope),
            claim_role: optional_text(prior.claim_role.as_deref(), self.claim_role),
            revision_number: self.revision_number,
            read_only: self.read_only,
        }
    }
}

/// An empty scope echoed for a policy that never set one stays absent.
fn optional_scope(prior: Option<&DynamicValue>, remote: Option<DynamicValue>) -> Option<DynamicValue> {
    match remote {
        Some(DynamicValue::Map(map)) if map.is_empty() && prior.is_none() => None,
        Some(DynamicValue::List(items)) if items.is_empty() && prior.is_none() => None,
        Some(DynamicValue::String(text)) if text.is_empty() && prior.is_none() => None,
        other => other,
    }
}

/// Adapter for RBAC policies.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyResource;

#[async_trait]
impl Resource for PolicyResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("An RBAC policy granting roles over a data scope.")
            .with_attribute("uuid", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string().with_validator(StringValidator::NotEmpty),
            )
            .with_attribute("description", Attribute::optional_string())
            .with_attribute(
                "role",
                Attribute::required_string_map()
                    .with_description("Permission per product area, e.g. {admin = \"admin\"}."),
            )
            .with_attribute(
                "data_scope",
                Attribute::optional_dynamic().with_description("Free-form data scope filter."),
            )
            .with_attribute("claim_role", Attribute::optional_string())
            .with_attribute("revision_number", Attribute::computed_int64())
            .with_attribute("read_only", Attribute::computed_bool())
    }

    fn id_attribute(&self) -> &'static str {
        "uuid"
    }

    async fn create(&self, client: &ApiClient, planned: Value, ctx: &CallContext) -> Result<Value> {
        let state: PolicyState = decode_state(TYPE_NAME, planned)?;
        let created: Policy = client
            .send_json(
                Method::POST,
                Operation::create(Entity::Policy),
                &state.name,
                CREATE_PATH,
                &PolicyRequest::from_state(&state),
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
        let state: PolicyState = decode_state(TYPE_NAME, current)?;
        let uuid = require_id(TYPE_NAME, &state.uuid)?;
        let fetched = absent_if_not_found(
            client
                .get_json::<Policy>(Operation::read(Entity::Policy), uuid, &policy_path(uuid), ctx)
                .await,
        )?;
        fetched
            .map(|policy| encode_state(&policy.into_state(&state)))
            .transpose()
    }

    async fn update(
        &self,
        client: &ApiClient,
        prior: Value,
        planned: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        let prior: PolicyState = decode_state(TYPE_NAME, prior)?;
        let planned: PolicyState = decode_state(TYPE_NAME, planned)?;
        let uuid = require_id(TYPE_NAME, &prior.uuid)?;

        let mut request = PolicyRequest::from_state(&planned);
        request.current_revision = prior.revision_number;
        let updated: Policy = client
            .send_json(
                Method::PUT,
                Operation::update(Entity::Policy),
                uuid,
                &policy_path(uuid),
                &request,
                ctx,
            )
            .await?;
        encode_state(&updated.into_state(&planned))
    }

    async fn delete(&self, client: &ApiClient, current: Value, ctx: &CallContext) -> Result<()> {
        let state: PolicyState = decode_state(TYPE_NAME, current)?;
        let uuid = require_id(TYPE_NAME, &state.uuid)?;
        ignore_not_found(
            client
                .delete(Operation::delete(Entity::Policy), uuid, &policy_path(uuid), ctx)
                .await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{test_client_config, MockResponse, MockTransport};
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<MockTransport>, ApiClient) {
        let mock = Arc::new(MockTransport::new());
        let client = ApiClient::with_transport(&test_client_config(), mock.clone()).unwrap();
        (mock, client)
    }

    fn remote(revision: i64) -> Value {
        json!({
            "uuid": "p-1",
            "name": "ops",
            "description": "",
            "role": {"admin": "admin"},
            "dataScope": {"simple": {"operator": "and", "conditions": []}},
            "revisionNumber": revision,
            "readOnly": false
        })
    }

    #[tokio::test]
    async fn test_create_maps_wire_shape() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(200, remote(1)));

        let state = PolicyResource
            .create(
                &client,
                json!({
                    "name": "ops",
                    "role": {"admin": "admin"},
                    "data_scope": {"simple": {"operator": "and", "conditions": []}}
                }),
                &CallContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(state["uuid"], "p-1");
        assert_eq!(state["revision_number"], 1);
        // Echoed empty description stays absent.
        assert!(state.get("description").is_none());

        let sent = mock.request_json(0);
        assert_eq!(sent["name"], "ops");
        assert_eq!(sent["dataScope"]["simple"]["operator"], "and");
        assert!(sent.get("description").is_none());
        assert!(sent.get("currentRevision").is_none());
        assert_eq!(mock.requests()[0].path, CREATE_PATH);
    }

    #[tokio::test]
    async fn test_create_name_collision() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(
            409,
            json!({"error": "conflict", "message": "policy already exists"}),
        ));

        let err = PolicyResource
            .create(
                &client,
                json!({"name": "dup-policy", "role": {"admin": "admin"}}),
                &CallContext::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let message = err.to_string();
        assert!(message.contains("dup-policy"));
        assert!(message.contains("'name'"));
    }

    #[tokio::test]
    async fn test_update_sends_current_revision() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(200, remote(4)));

        let prior = json!({"uuid": "p-1", "name": "ops", "role": {"admin": "admin"}, "revision_number": 3});
        let planned = json!({"uuid": "p-1", "name": "ops", "role": {"admin": "admin"}, "revision_number": 3});
        let state = PolicyResource
            .update(&client, prior, planned, &CallContext::new())
            .await
            .unwrap();

        assert_eq!(state["revision_number"], 4);
        let request = &mock.requests()[0];
        assert_eq!(request.method, Method::PUT);
        assert_eq!(request.path, "/api/rbac/policy/p-1");
        assert_eq!(mock.request_json(0)["currentRevision"], 3);
    }

    #[tokio::test]
    async fn test_update_stale_revision_is_conflict() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(409, json!({"message": "revision mismatch"})));

        let prior = json!({"uuid": "p-1", "name": "ops", "role": {}, "revision_number": 1});
        let err = PolicyResource
            .update(&client, prior.clone(), prior, &CallContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_read_missing_is_absent() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(404, json!({"message": "policy not found"})));

        let state = PolicyResource
            .read(
                &client,
                json!({"uuid": "missing-id", "name": "ops", "role": {}}),
                &CallContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(state, None);
    }

    #[tokio::test]
    async fn test_delete_twice_succeeds() {
        let (mock, client) = setup();
        mock.push(MockResponse::status(200));
        mock.push(MockResponse::json(404, json!({"message": "not found"})));

        let state = json!({"uuid": "p-1", "name": "ops", "role": {}});
        let ctx = CallContext::new();
        PolicyResource.delete(&client, state.clone(), &ctx).await.unwrap();
        PolicyResource.delete(&client, state, &ctx).await.unwrap();
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_scope_stays_absent() {
        let (mock, client) = setup();
        let mut body = remote(2);
        body["dataScope"] = json!({});
        mock.push(MockResponse::json(200, body.clone()));
        mock.push(MockResponse::json(200, body));

        let ctx = CallContext::new();
        let state = PolicyResource
            .read(
                &client,
                json!({"uuid": "p-1", "name": "ops", "role": {"admin": "admin"}}),
                &ctx,
            )
            .await
            .unwrap()
            .unwrap();
        assert!(state.get("data_scope").is_none());

        // A scope the user set is still reported when it comes back empty.
        let state = PolicyResource
            .read(
                &client,
                json!({
                    "uuid": "p-1",
                    "name": "ops",
                    "role": {"admin": "admin"},
                    "data_scope": {"simple": {"operator": "and"}}
                }),
                &ctx,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["data_scope"], json!({}));
    }

    #[tokio::test]
    async fn test_import_fills_state_from_api() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(200, remote(7)));

        let state = PolicyResource
            .import(&client, "p-1", &CallContext::new())
            .await
            .unwrap();

        assert_eq!(state["uuid"], "p-1");
        assert_eq!(state["name"], "ops");
        assert_eq!(state["role"]["admin"], "admin");
        assert_eq!(state["data_scope"]["simple"]["operator"], "and");
        assert_eq!(state["revision_number"], 7);
        assert!(state.get("description").is_none());
        assert_eq!(mock.requests()[0].path, "/api/rbac/policy/p-1");
    }

    #[tokio::test]
    async fn test_read_only_policy() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(
            403,
            json!({"message": "policy is read-only"}),
        ));

        let err = PolicyResource
            .delete(
                &client,
                json!({"uuid": "builtin", "name": "Admin", "role": {}}),
                &CallContext::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnly);
    }
}
