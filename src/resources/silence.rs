//! `groundcover_silence`: time-boxed monitor silences.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    absent_if_not_found, decode_state, encode_state, ignore_not_found, optional_text,
    reconcile_timestamp, require_id, Resource,
};
use crate::classify::{Entity, Operation};
use crate::client::ApiClient;
use crate::error::{ProviderError, Result};
use crate::schema::{Attribute, Block, NestedBlock, Schema, StringValidator};
use crate::transport::CallContext;

const TYPE_NAME: &str = "groundcover_silence";
const COLLECTION_PATH: &str = "/api/monitors/silences";

fn silence_path(id: &str) -> String {
    format!("{}/{}", COLLECTION_PATH, id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SilenceState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    starts_at: String,
    #[serde(default)]
    ends_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(default)]
    matchers: Vec<MatcherState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MatcherState {
    name: String,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_equal: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_contains: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Matcher {
    name: String,
    value: String,
    #[serde(default = "default_true")]
    is_equal: bool,
    #[serde(default)]
    is_contains: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SilenceRequest<'a> {
    starts_at: &'a str,
    ends_at: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    matchers: Vec<Matcher>,
}

impl<'a> SilenceRequest<'a> {
    fn from_state(state: &'a SilenceState) -> Self {
        Self {
            starts_at: &state.starts_at,
            ends_at: &state.ends_at,
            comment: state.comment.as_deref(),
            matchers: state
                .matchers
                .iter()
                .map(|m| Matcher {
                    name: m.name.clone(),
                    value: m.value.clone(),
                    is_equal: m.is_equal.unwrap_or(true),
                    is_contains: m.is_contains.unwrap_or(false),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Silence {
    uuid: String,
    starts_at: String,
    ends_at: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    matchers: Vec<Matcher>,
}

impl Silence {
    fn into_state(self, prior: &SilenceState) -> SilenceState {
        let matchers = self
            .matchers
            .into_iter()
            .enumerate()
            .map(|(i, remote)| {
                let before = prior.matchers.get(i);
                MatcherState {
                    is_equal: optional_flag(before.and_then(|m| m.is_equal), remote.is_equal, true),
                    is_contains: optional_flag(
                        before.and_then(|m| m.is_contains),
                        remote.is_contains,
                        false,
                    ),
                    name: remote.name,
                    value: remote.value,
                }
            })
            .collect();
        SilenceState {
            id: Some(self.uuid),
            starts_at: reconcile_timestamp(Some(&prior.starts_at), Some(self.starts_at))
                .unwrap_or_default(),
            ends_at: reconcile_timestamp(Some(&prior.ends_at), Some(self.ends_at))
                .unwrap_or_default(),
            comment: optional_text(prior.comment.as_deref(), self.comment),
            matchers,
        }
    }
}

/// Leave a flag unset in state if the user never set it and the API reports
/// the default.
fn optional_flag(prior: Option<bool>, remote: bool, default: bool) -> Option<bool> {
    if prior.is_some() || remote != default {
        Some(remote)
    } else {
        None
    }
}

fn parse_time(attribute: &str, value: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).map_err(|e| {
        ProviderError::Validation(format!(
            "{} '{}' is not an RFC 3339 timestamp: {}",
            attribute, value, e
        ))
    })
}

fn check_window(state: &SilenceState) -> Result<()> {
    let starts_at = parse_time("starts_at", &state.starts_at)?;
    let ends_at = parse_time("ends_at", &state.ends_at)?;
    if ends_at <= starts_at {
        return Err(ProviderError::Validation(format!(
            "ends_at ({}) must be later than starts_at ({})",
            state.ends_at, state.starts_at
        )));
    }
    if state.matchers.is_empty() {
        return Err(ProviderError::Validation(
            "a silence needs at least one matcher".to_string(),
        ));
    }
    Ok(())
}

/// Adapter for monitor silences.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilenceResource;

#[async_trait]
impl Resource for SilenceResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Silences monitor notifications matching all matchers during a window.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "starts_at",
                Attribute::required_string().with_validator(StringValidator::Rfc3339),
            )
            .with_attribute(
                "ends_at",
                Attribute::required_string().with_validator(StringValidator::Rfc3339),
            )
            .with_attribute("comment", Attribute::optional_string())
            .with_block(
                "matchers",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("name", Attribute::required_string())
                        .with_attribute("value", Attribute::required_string())
                        .with_attribute(
                            "is_equal",
                            Attribute::optional_bool().with_description("Defaults to true."),
                        )
                        .with_attribute(
                            "is_contains",
                            Attribute::optional_bool().with_description("Defaults to false."),
                        ),
                )
                .with_min_items(1),
            )
    }

    async fn create(&self, client: &ApiClient, planned: Value, ctx: &CallContext) -> Result<Value> {
        let state: SilenceState = decode_state(TYPE_NAME, planned)?;
        check_window(&state)?;
        let created: Silence = client
            .send_json(
                Method::POST,
                Operation::create(Entity::Silence),
                &state.starts_at,
                COLLECTION_PATH,
                &SilenceRequest::from_state(&state),
                ctx,
            )
            .await?;
        encode_state(&created.into_state(&state))
    }

    async fn read(
        &self,
        client: &ApiClient,
        current: Value,
        ctx: &CallContext,
    ) -> Result<Option<Value>> {
        let state: SilenceState = decode_state(TYPE_NAME, current)?;
        let id = require_id(TYPE_NAME, &state.id)?;
        let fetched = absent_if_not_found(
            client
                .get_json::<Silence>(Operation::read(Entity::Silence), id, &silence_path(id), ctx)
                .await,
        )?;
        fetched
            .map(|silence| encode_state(&silence.into_state(&state)))
            .transpose()
    }

    async fn update(
        &self,
        client: &ApiClient,
        prior: Value,
        planned: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        let prior: SilenceState = decode_state(TYPE_NAME, prior)?;
        let planned: SilenceState = decode_state(TYPE_NAME, planned)?;
        check_window(&planned)?;
        let id = require_id(TYPE_NAME, &prior.id)?;
        let updated: Silence = client
            .send_json(
                Method::PUT,
                Operation::update(Entity::Silence),
                id,
                &silence_path(id),
                &SilenceRequest::from_state(&planned),
                ctx,
            )
            .await?;
        encode_state(&updated.into_state(&planned))
    }

    async fn delete(&self, client: &ApiClient, current: Value, ctx: &CallContext) -> Result<()> {
        let state: SilenceState = decode_state(TYPE_NAME, current)?;
        let id = require_id(TYPE_NAME, &state.id)?;
        ignore_not_found(
            client
                .delete(Operation::delete(Entity::Silence), id, &silence_path(id), ctx)
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

    fn planned() -> Value {
        json!({
            "starts_at": "2024-06-01T10:00:00+02:00",
            "ends_at": "2024-06-01T12:00:00+02:00",
            "comment": "maintenance",
            "matchers": [{"name": "env", "value": "prod"}]
        })
    }

    #[tokio::test]
    async fn test_create_sends_default_flags() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(
            200,
            json!({
                "uuid": "s-1",
                "startsAt": "2024-06-01T08:00:00Z",
                "endsAt": "2024-06-01T10:00:00Z",
                "comment": "maintenance",
                "matchers": [{"name": "env", "value": "prod", "isEqual": true, "isContains": false}]
            }),
        ));

        let state = SilenceResource
            .create(&client, planned(), &CallContext::new())
            .await
            .unwrap();

        // Same instants keep the user's formatting; default flags stay unset.
        assert_eq!(state, {
            let mut expected = planned();
            expected["id"] = json!("s-1");
            expected
        });

        let sent = mock.request_json(0);
        assert_eq!(sent["startsAt"], "2024-06-01T10:00:00+02:00");
        assert_eq!(sent["matchers"][0]["isEqual"], true);
        assert_eq!(sent["matchers"][0]["isContains"], false);
    }

    #[tokio::test]
    async fn test_window_checked_before_any_call() {
        let (mock, client) = setup();

        let mut backwards = planned();
        backwards["ends_at"] = json!("2024-06-01T09:00:00+02:00");
        let err = SilenceResource
            .create(&client, backwards, &CallContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut garbled = planned();
        garbled["starts_at"] = json!("tomorrow");
        let err = SilenceResource
            .create(&client, garbled, &CallContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("starts_at"));

        let mut no_matchers = planned();
        no_matchers["matchers"] = json!([]);
        assert!(SilenceResource
            .create(&client, no_matchers, &CallContext::new())
            .await
            .is_err());

        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_read_reports_changed_flags() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(
            200,
            json!({
                "uuid": "s-1",
                "startsAt": "2024-06-01T08:00:00Z",
                "endsAt": "2024-06-01T11:00:00Z",
                "matchers": [{"name": "env", "value": "prod", "isEqual": false}]
            }),
        ));

        let mut current = planned();
        current["id"] = json!("s-1");
        let state = SilenceResource
            .read(&client, current, &CallContext::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["ends_at"], "2024-06-01T11:00:00Z");
        assert_eq!(state["matchers"][0]["is_equal"], false);
        assert!(state["matchers"][0].get("is_contains").is_none());
        assert!(state.get("comment").is_none());
    }

    #[tokio::test]
    async fn test_import_fills_state_from_api() {
        let (mock, client) = setup();
        mock.push(MockResponse::json(
            200,
            json!({
                "uuid": "s-1",
                "startsAt": "2024-06-01T08:00:00Z",
                "endsAt": "2024-06-01T10:00:00Z",
                "comment": "maintenance",
                "matchers": [{"name": "env", "value": "prod", "isEqual": true, "isContains": true}]
            }),
        ));

        let state = SilenceResource
            .import(&client, "s-1", &CallContext::new())
            .await
            .unwrap();

        assert_eq!(state["id"], "s-1");
        assert_eq!(state["starts_at"], "2024-06-01T08:00:00Z");
        assert_eq!(state["ends_at"], "2024-06-01T10:00:00Z");
        assert_eq!(state["comment"], "maintenance");
        assert_eq!(state["matchers"][0]["name"], "env");
        assert!(state["matchers"][0].get("is_equal").is_none());
        assert_eq!(state["matchers"][0]["is_contains"], true);
        assert_eq!(mock.requests()[0].path, "/api/monitors/silences/s-1");
    }

    #[test]
    fn test_optional_flag() {
        assert_eq!(optional_flag(None, true, true), None);
        assert_eq!(optional_flag(None, false, true), Some(false));
        assert_eq!(optional_flag(Some(true), true, true), Some(true));
    }
}
