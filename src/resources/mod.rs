//! Resource adapters, one per managed entity type.
//!
//! Each adapter owns the schema of its resource and translates between the
//! state the host keeps (`serde_json::Value`, snake_case) and the wire DTOs
//! of the API. Absence is handled here: `read` returns `Ok(None)` when the
//! entity is gone, and `delete` treats an already-deleted entity as success.

use async_trait::async_trait;
use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::client::ApiClient;
use crate::error::{ProviderError, Result};
use crate::schema::Schema;
use crate::transport::CallContext;

pub mod api_key;
pub mod connected_app;
pub mod dashboard;
pub mod data_integration;
pub mod ingestion_key;
pub mod policy;
pub mod service_account;
pub mod silence;
pub mod singleton;

pub use api_key::ApiKeyResource;
pub use connected_app::ConnectedAppResource;
pub use dashboard::DashboardResource;
pub use data_integration::DataIntegrationResource;
pub use ingestion_key::IngestionKeyResource;
pub use policy::PolicyResource;
pub use service_account::ServiceAccountResource;
pub use silence::SilenceResource;
pub use singleton::YamlConfigResource;

/// A managed entity type.
#[async_trait]
pub trait Resource: Send + Sync {
    /// The resource type name, e.g. `groundcover_policy`.
    fn type_name(&self) -> &'static str;

    /// The resource schema.
    fn schema(&self) -> Schema;

    /// Name of the attribute holding the identifier used for import.
    fn id_attribute(&self) -> &'static str {
        "id"
    }

    /// Create the entity and return the resulting state.
    async fn create(&self, client: &ApiClient, planned: Value, ctx: &CallContext) -> Result<Value>;

    /// Refresh the state. `Ok(None)` means the entity no longer exists.
    async fn read(&self, client: &ApiClient, current: Value, ctx: &CallContext)
        -> Result<Option<Value>>;

    /// Apply an in-place update.
    async fn update(
        &self,
        client: &ApiClient,
        prior: Value,
        planned: Value,
        ctx: &CallContext,
    ) -> Result<Value>;

    /// Delete the entity. Already-deleted entities are not an error.
    async fn delete(&self, client: &ApiClient, current: Value, ctx: &CallContext) -> Result<()>;

    /// Build the minimal state an import starts from.
    fn import_state(&self, id: &str) -> Result<Value> {
        if id.trim().is_empty() {
            return Err(ProviderError::InvalidRequest(format!(
                "import identifier for {} must not be empty",
                self.type_name()
            )));
        }
        let mut state = serde_json::Map::new();
        state.insert(self.id_attribute().to_string(), Value::String(id.to_string()));
        Ok(Value::Object(state))
    }

    /// Import an existing entity by identifier.
    async fn import(&self, client: &ApiClient, id: &str, ctx: &CallContext) -> Result<Value> {
        let state = self.import_state(id)?;
        self.read(client, state, ctx).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("{} '{}' does not exist", self.type_name(), id))
        })
    }

    /// Adjust a planned state against the prior one, e.g. to keep the prior
    /// text of a document that only differs in formatting.
    fn reconcile_plan(&self, _prior: &Value, planned: Value) -> Value {
        planned
    }
}

/// All resources the provider manages.
pub fn all() -> Vec<Box<dyn Resource>> {
    vec![
        Box::new(PolicyResource),
        Box::new(ServiceAccountResource),
        Box::new(ApiKeyResource),
        Box::new(DashboardResource),
        Box::new(SilenceResource),
        Box::new(ConnectedAppResource),
        Box::new(DataIntegrationResource),
        Box::new(IngestionKeyResource),
        Box::new(YamlConfigResource::logs_pipeline()),
        Box::new(YamlConfigResource::metrics_aggregation()),
    ]
}

/// Deserialize a state value into a typed state struct.
pub(crate) fn decode_state<T: DeserializeOwned>(resource_type: &str, state: Value) -> Result<T> {
    serde_json::from_value(state)
        .map_err(|e| ProviderError::Validation(format!("invalid {} state: {}", resource_type, e)))
}

/// Serialize a typed state struct back into a state value.
pub(crate) fn encode_state<T: Serialize>(state: &T) -> Result<Value> {
    Ok(serde_json::to_value(state)?)
}

/// Turn a not-found error into `None`.
pub(crate) fn absent_if_not_found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Treat a not-found error on delete as success.
pub(crate) fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// The identifier stored in state, required for every call after create.
pub(crate) fn require_id<'a>(resource_type: &str, id: &'a Option<String>) -> Result<&'a str> {
    match id.as_deref() {
        Some(id) if !id.is_empty() => path_segment(id),
        _ => Err(ProviderError::InvalidRequest(format!(
            "{} state has no identifier",
            resource_type
        ))),
    }
}

/// Check that an identifier can be placed in a URL path as one segment.
pub(crate) fn path_segment(id: &str) -> Result<&str> {
    if id.is_empty() || id.contains(['/', '?', '#']) {
        return Err(ProviderError::InvalidRequest(format!(
            "'{}' is not a valid identifier",
            id
        )));
    }
    Ok(id)
}

/// Keep an optional text attribute absent when the user never set it and
/// the API echoes it back empty.
pub(crate) fn optional_text(prior: Option<&str>, remote: Option<String>) -> Option<String> {
    match (prior, remote) {
        (None, Some(remote)) if remote.is_empty() => None,
        (_, remote) => remote,
    }
}

/// Keep the prior RFC 3339 text when the API returns the same instant in a
/// different format.
pub(crate) fn reconcile_timestamp(prior: Option<&str>, remote: Option<String>) -> Option<String> {
    match (prior, remote) {
        (Some(prior), Some(remote)) => {
            let same = match (
                DateTime::parse_from_rfc3339(prior),
                DateTime::parse_from_rfc3339(&remote),
            ) {
                (Ok(a), Ok(b)) => a == b,
                _ => prior == remote,
            };
            Some(if same { prior.to_string() } else { remote })
        },
        (_, remote) => remote,
    }
}

/// Split an import identifier of the form `<type>:<id>` on the first colon.
pub(crate) fn parse_import_id(id: &str) -> Result<(&str, &str)> {
    match id.split_once(':') {
        Some((kind, rest)) if !kind.is_empty() && !rest.is_empty() => Ok((kind, rest)),
        _ => Err(ProviderError::InvalidRequest(format!(
            "import identifier '{}' must have the form <type>:<id>",
            id
        ))),
    }
}
