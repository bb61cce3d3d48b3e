//! The groundcover provider.
//!
//! [`GroundcoverProvider`] implements [`ProviderService`] by dispatching each
//! call to the [`Resource`] adapter registered for the resource type. The API
//! client is built by `configure`; every later call shares it along with a
//! cancellation token that `stop` trips.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::client::ApiClient;
use crate::config::{ClientConfig, ProviderConfig};
use crate::error::{ProviderError, Result};
use crate::resources::{self, Resource};
use crate::schema::{Diagnostic, ProviderSchema, Schema};
use crate::service::ProviderService;
use crate::transport::{cancellation, CallContext, CancelHandle, CancelToken, Transport};
use crate::types::{AttributeChange, ImportedResource, PlanResult};
use crate::validation::validate;

/// State created by `configure`.
struct Session {
    client: Arc<ApiClient>,
    cancel: CancelHandle,
    token: CancelToken,
}

/// Provider managing groundcover resources.
pub struct GroundcoverProvider {
    resources: BTreeMap<&'static str, Box<dyn Resource>>,
    transport: Option<Arc<dyn Transport>>,
    session: RwLock<Option<Session>>,
}

impl std::fmt::Debug for GroundcoverProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroundcoverProvider")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("custom_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for GroundcoverProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GroundcoverProvider {
    /// Create a provider with every resource registered. It must be
    /// configured before use.
    pub fn new() -> Self {
        let resources = resources::all()
            .into_iter()
            .map(|resource| (resource.type_name(), resource))
            .collect();
        Self {
            resources,
            transport: None,
            session: RwLock::new(None),
        }
    }

    /// Send every API call through `transport` instead of the default HTTP
    /// stack. Used to run the provider against scripted responses.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    fn resource(&self, resource_type: &str) -> Result<&dyn Resource> {
        self.resources
            .get(resource_type)
            .map(|resource| resource.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    /// The client and call context for an API call.
    async fn connection(&self) -> Result<(Arc<ApiClient>, CallContext)> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or_else(|| {
            ProviderError::Configuration(
                "provider is not configured; call configure first".to_string(),
            )
        })?;
        let ctx = CallContext::new().with_cancel(session.token.clone());
        Ok((session.client.clone(), ctx))
    }

    fn build_client(&self, config: Value) -> Result<ApiClient> {
        let config = ProviderConfig::from_value(config)?;
        let resolved = ClientConfig::resolve(&config)?;
        debug!(
            api_url = %resolved.api_url,
            backend_id = %resolved.backend_id,
            "Resolved client configuration"
        );
        match &self.transport {
            Some(transport) => ApiClient::with_transport(&resolved, transport.clone()),
            None => ApiClient::new(&resolved),
        }
    }
}

#[async_trait::async_trait]
impl ProviderService for GroundcoverProvider {
    fn schema(&self) -> ProviderSchema {
        self.resources.iter().fold(
            ProviderSchema::new().with_provider_config(ProviderConfig::schema()),
            |schema, (name, resource)| schema.with_resource(*name, resource.schema()),
        )
    }

    #[instrument(skip(self, config), name = "provider.configure")]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>> {
        debug!("Configure called");
        let diagnostics = validate(&ProviderConfig::schema(), &config);
        if diagnostics.iter().any(Diagnostic::is_error) {
            warn!(diagnostics = diagnostics.len(), "Configure rejected the provider block");
            return Ok(diagnostics);
        }

        let client = match self.build_client(config) {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "Configure failed");
                return Ok(vec![
                    Diagnostic::error("Invalid provider configuration").with_detail(e.to_string())
                ]);
            },
        };

        let (cancel, token) = cancellation();
        let previous = self.session.write().await.replace(Session {
            client: Arc::new(client),
            cancel,
            token,
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        info!("Configure completed successfully");
        Ok(diagnostics)
    }

    #[instrument(skip(self), name = "provider.stop")]
    async fn stop(&self) -> Result<()> {
        info!("Stop called");
        if let Some(session) = self.session.read().await.as_ref() {
            session.cancel.cancel();
        }
        Ok(())
    }

    #[instrument(skip(self, config), name = "provider.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>> {
        debug!(resource_type = %resource_type, "ValidateResourceConfig called");
        let diagnostics = validate(&self.resource(resource_type)?.schema(), &config);
        if diagnostics.iter().any(Diagnostic::is_error) {
            warn!(
                resource_type = %resource_type,
                diagnostics = diagnostics.len(),
                "ValidateResourceConfig completed with errors"
            );
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, prior_state, proposed_state, _config), name = "provider.plan")]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult> {
        let prior_state = prior_state.filter(|state| !state.is_null());
        debug!(resource_type = %resource_type, is_create = prior_state.is_none(), "Plan called");
        let resource = self.resource(resource_type)?;
        let result = plan_resource(resource, prior_state.as_ref(), proposed_state);
        match &result {
            Ok(plan) => info!(
                resource_type = %resource_type,
                changes = plan.changes.len(),
                requires_replace = plan.requires_replace,
                "Plan completed"
            ),
            Err(e) => error!(resource_type = %resource_type, error = %e, "Plan failed"),
        }
        result
    }

    #[instrument(skip(self, planned_state), name = "provider.create")]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value> {
        info!(resource_type = %resource_type, "Create called");
        let resource = self.resource(resource_type)?;
        let (client, ctx) = self.connection().await?;
        match resource.create(&client, planned_state, &ctx).await {
            Ok(state) => {
                info!(resource_type = %resource_type, "Create completed successfully");
                Ok(state)
            },
            Err(e) => {
                error!(resource_type = %resource_type, error = %e, "Create failed");
                Err(e)
            },
        }
    }

    #[instrument(skip(self, current_state), name = "provider.read")]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value> {
        debug!(resource_type = %resource_type, "Read called");
        let resource = self.resource(resource_type)?;
        let (client, ctx) = self.connection().await?;
        match resource.read(&client, current_state, &ctx).await {
            Ok(Some(state)) => {
                debug!(resource_type = %resource_type, "Read completed successfully");
                Ok(state)
            },
            Ok(None) => {
                info!(resource_type = %resource_type, "Resource no longer exists");
                Ok(Value::Null)
            },
            Err(e) => {
                error!(resource_type = %resource_type, error = %e, "Read failed");
                Err(e)
            },
        }
    }

    #[instrument(skip(self, prior_state, planned_state), name = "provider.update")]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value> {
        info!(resource_type = %resource_type, "Update called");
        let resource = self.resource(resource_type)?;
        let (client, ctx) = self.connection().await?;
        match resource.update(&client, prior_state, planned_state, &ctx).await {
            Ok(state) => {
                info!(resource_type = %resource_type, "Update completed successfully");
                Ok(state)
            },
            Err(e) => {
                error!(resource_type = %resource_type, error = %e, "Update failed");
                Err(e)
            },
        }
    }

    #[instrument(skip(self, current_state), name = "provider.delete")]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<()> {
        info!(resource_type = %resource_type, "Delete called");
        let resource = self.resource(resource_type)?;
        let (client, ctx) = self.connection().await?;
        match resource.delete(&client, current_state, &ctx).await {
            Ok(()) => {
                info!(resource_type = %resource_type, "Delete completed successfully");
                Ok(())
            },
            Err(e) => {
                error!(resource_type = %resource_type, error = %e, "Delete failed");
                Err(e)
            },
        }
    }

    #[instrument(skip(self), name = "provider.import_resource")]
    async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>> {
        info!(resource_type = %resource_type, id = %id, "ImportResource called");
        let resource = self.resource(resource_type)?;
        let (client, ctx) = self.connection().await?;
        match resource.import(&client, id, &ctx).await {
            Ok(state) => {
                info!(resource_type = %resource_type, id = %id, "ImportResource completed successfully");
                Ok(vec![ImportedResource::new(resource_type, state)])
            },
            Err(e) => {
                error!(resource_type = %resource_type, id = %id, error = %e, "ImportResource failed");
                Err(e)
            },
        }
    }
}

/// Compute the plan for one resource.
///
/// Computed attributes are carried over from the prior state unless the
/// resource is replaced. Each attribute and nested block is compared as a
/// whole; `null` and missing are the same.
fn plan_resource(
    resource: &dyn Resource,
    prior: Option<&Value>,
    proposed: Value,
) -> Result<PlanResult> {
    let Value::Object(proposed) = proposed else {
        return Err(ProviderError::InvalidRequest(format!(
            "proposed state for {} must be an object",
            resource.type_name()
        )));
    };
    let schema = resource.schema();

    let Some(prior) = prior else {
        let planned = Value::Object(proposed);
        let changes = inputs(&schema)
            .filter_map(|(name, _)| {
                present(&planned, name).map(|value| AttributeChange::added(name, value.clone()))
            })
            .collect();
        return Ok(PlanResult::with_changes(planned, changes, false));
    };

    let mut planned = proposed;
    for (name, attr) in &schema.block.attributes {
        if attr.flags.is_computed_only() {
            match present(prior, name) {
                Some(value) => planned.insert(name.clone(), value.clone()),
                None => planned.remove(name),
            };
        }
    }
    let mut planned = resource.reconcile_plan(prior, Value::Object(planned));

    let mut changes = Vec::new();
    let mut requires_replace = false;
    for (name, force_new) in inputs(&schema) {
        let change = match (present(prior, name), present(&planned, name)) {
            (None, None) => continue,
            (Some(before), Some(after)) if before == after => continue,
            (None, Some(after)) => AttributeChange::added(name, after.clone()),
            (Some(before), None) => AttributeChange::removed(name, before.clone()),
            (Some(before), Some(after)) => {
                AttributeChange::modified(name, before.clone(), after.clone())
            },
        };
        requires_replace |= force_new;
        changes.push(change);
    }
    changes.sort_by(|a, b| a.path.cmp(&b.path));

    if requires_replace {
        if let Value::Object(object) = &mut planned {
            for (name, attr) in &schema.block.attributes {
                if attr.flags.is_computed_only() {
                    object.remove(name);
                }
            }
        }
    }

    if changes.is_empty() {
        Ok(PlanResult::no_change(planned))
    } else {
        Ok(PlanResult::with_changes(planned, changes, requires_replace))
    }
}

/// User-settable attributes and nested blocks, with their `force_new` flag.
fn inputs<'a>(schema: &'a Schema) -> impl Iterator<Item = (&'a str, bool)> + 'a {
    let attributes = schema
        .block
        .attributes
        .iter()
        .filter(|(_, attr)| !attr.flags.is_computed_only())
        .map(|(name, attr)| (name.as_str(), attr.force_new));
    let blocks = schema
        .block
        .blocks
        .iter()
        .map(|(name, block)| (name.as_str(), block.force_new));
    attributes.chain(blocks)
}

fn present<'a>(state: &'a Value, name: &str) -> Option<&'a Value> {
    state.get(name).filter(|value| !value.is_null())
}
