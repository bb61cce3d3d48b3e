//! `groundcover_serviceaccount`: non-human identities bound to policies.

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

const TYPE_NAME: &str = "groundcover_serviceaccount";
const CREATE_PATH: &str = "/api/rbac/service-account/create";
const UPDATE_PATH: &str = "/api/rbac/service-account/update";

fn account_path(id: &str) -> String {
    format!("/api/rbac/service-account/{}", id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ServiceAccountState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    policy_uuids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
    name: &'a str,
    email: &'a str,
    #[serde(rename = "policyUUIDs")]
    policy_uuids: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    service_account_id: &'a str,
    email: &'a str,
    #[serde(rename = "policyUUIDs")]
    policy_uuids: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    service_account_id: String,
}

#[derive(Debug, Deserialize)]
struct PolicyRef {
    uuid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceAccount {
    service_account_id: String,
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    policies: Vec<PolicyRef>,
}

impl ServiceAccount {
    fn into_state(self, prior: &ServiceAccountState) -> ServiceAccountState {
        let mut policy_uuids: Vec<String> = self.policies.into_iter().map(|p| p.uuid).collect();
        if same_members(&policy_uuids, &prior.policy_uuids) {
            policy_uuids = prior.policy_uuids.clone();
        }
        ServiceAccountState {
            id: Some(self.service_account_id),
            name: self.name,
            email: self.email,
            policy_uuids,
        }
    }
}

/// The API does not preserve policy order; keep the user's order when the
/// members match.
fn same_members(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<&String> = a.iter().collect();
    let mut b: Vec<&String> = b.iter().collect();
    a.sort();
    b.sort();
    a == b
}

/// Adapter for service accounts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceAccountResource;

#[async_trait]
impl Resource for ServiceAccountResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A service account for machine access.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_validator(StringValidator::NotEmpty)
                    .with_force_new(),
            )
            .with_attribute("email", Attribute::required_string())
            .with_attribute(
                "policy_uuids",
                Attribute::required_string_list()
                    .with_description("Policies granted to the service account."),
            )
    }

    async fn create(&self, client: &ApiClient, planned: Value, ctx: &CallContext) -> Result<Value> {
        let mut state: ServiceAccountState = decode_state(TYPE_NAME, planned)?;
        let created: CreateResponse = client
            .send_json(
                Method::POST,
                Operation::create(Entity::ServiceAccount),
                &state.name,
                CREATE_PATH,
                &CreateRequest {
                    name: &state.name,
                    email: &state.email,
                    policy_uuids: &state.policy_uuids,
                },
                ctx,
            )
            .await
            .map_err(|e| e.with_conflicting_attribute("name"))?;
        state.id = Some(created.service_account_id);
        encode_state(&state)
    }

    async fn read(
        &self,
        client: &ApiClient,
        current: Value,
        ctx: &CallContext,
    ) -> Result<Option<Value>> {
        let state: ServiceAccountState = decode_state(TYPE_NAME, current)?;
        let id = require_id(TYPE_NAME, &state.id)?;
        let fetched = absent_if_not_found(
            client
                .get_json::<ServiceAccount>(
                    Operation::read(Entity::ServiceAccount),
                    id,
                    &account_path(id),
                    ctx,
                )
                .await,
        )?;
        fetched
            .map(|account| encode_state(&account.into_state(&state)))
            .transpose()
    }

    async fn update(
        &self,
        client: &ApiClient,
        prior: Value,
        planned: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        let prior: ServiceAccountState = decode_state(TYPE_NAME, prior)?;
        let mut planned: ServiceAccountState = decode_state(TYPE_NAME, planned)?;
        let id = require_id(TYPE_NAME, &prior.id)?;

        client
            .send_json::<_, Value>(
                Method::PUT,
                Operation::update(Entity::ServiceAccount),
                id,
                UPDATE_PATH,
                &UpdateRequest {
                    service_account_id: id,
                    email: &planned.email,
                    policy_uuids: &planned.policy_uuids,
                },
                ctx,
            )
            .await?;
        planned.id = prior.id.clone();
        encode_state(&planned)
    }

    async fn delete(&self, client: &ApiClient, current: Value, ctx: &CallContext) -> Result<()> {
        let state: ServiceAccountState = decode_state(TYPE_NAME, current)?;
        let id = require_id(TYPE_NAME, &state.id)?;
        ignore_not_found(
            client
                .delete(Operation::delete(Entity::ServiceAccount), id, &account_path(id), ctx)
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

    #[tokio::test]
    async fn test_create_merges_id() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(200, json!({"serviceAccountId": "sa-1"})));

        let state = ServiceAccountResource
            .create(
                &client,
                json!({"name": "ci", "email": "ci@example.com", "policy_uuids": ["p-1"]}),
                &CallContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(state["id"], "sa-1");
        assert_eq!(state["policy_uuids"], json!(["p-1"]));
        assert_eq!(mock.request_json(0)["policyUUIDs"], json!(["p-1"]));
    }

    #[tokio::test]
    async fn test_read_keeps_policy_order() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(
            200,
            json!({
                "serviceAccountId": "sa-1",
                "name": "ci",
                "email": "ci@example.com",
                "policies": [{"uuid": "p-2", "name": "b"}, {"uuid": "p-1", "name": "a"}]
            }),
        ));

        let state = ServiceAccountResource
            .read(
                &client,
                json!({"id": "sa-1", "name": "ci", "email": "ci@example.com", "policy_uuids": ["p-1", "p-2"]}),
                &CallContext::new(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["policy_uuids"], json!(["p-1", "p-2"]));
    }

    #[tokio::test]
    async fn test_import_fills_state_from_api() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(
            200,
            json!({
                "serviceAccountId": "sa-1",
                "name": "ci",
                "email": "ci@example.com",
                "policies": [{"uuid": "p-2"}, {"uuid": "p-1"}]
            }),
        ));

        let state = ServiceAccountResource
            .import(&client, "sa-1", &CallContext::new())
            .await
            .unwrap();

        assert_eq!(state["id"], "sa-1");
        assert_eq!(state["name"], "ci");
        assert_eq!(state["email"], "ci@example.com");
        assert_eq!(state["policy_uuids"], json!(["p-2", "p-1"]));
        assert_eq!(mock.requests()[0].path, "/api/rbac/service-account/sa-1");
    }

    #[tokio::test]
    async fn test_update_targets_update_endpoint() {
        let (mock, client) = setup();
        mock.push(MockResponse::status(200));

        let prior = json!({"id": "sa-1", "name": "ci", "email": "old@example.com", "policy_uuids": []});
        let planned = json!({"name": "ci", "email": "new@example.com", "policy_uuids": ["p-1"]});
        let state = ServiceAccountResource
            .update(&client, prior, planned, &CallContext::new())
            .await
            .unwrap();

        assert_eq!(state["id"], "sa-1");
        assert_eq!(mock.requests()[0].path, UPDATE_PATH);
        assert_eq!(mock.request_json(0)["serviceAccountId"], "sa-1");
        assert_eq!(mock.request_json(0)["email"], "new@example.com");
    }

    #[tokio::test]
    async fn test_delete_bad_request_means_gone() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(400, json!({"message": "invalid service account"})));

        ServiceAccountResource
            .delete(
                &client,
                json!({"id": "sa-1", "name": "ci", "email": "e", "policy_uuids": []}),
                &CallContext::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_bad_request_is_api_error() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(400, json!({"message": "invalid email"})));

        let err = ServiceAccountResource
            .create(
                &client,
                json!({"name": "ci", "email": "nope", "policy_uuids": []}),
                &CallContext::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
    }
}
