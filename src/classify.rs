//! Mapping of failed API calls onto provider error kinds.
//!
//! The groundcover API does not return machine-readable error codes for every
//! failure, so classification looks at the HTTP status first and falls back to
//! matching on the error text. Rules are evaluated in a fixed order and the
//! first match wins:
//!
//! 1. create + 409 / "conflict" → [`ProviderError::AlreadyExists`]
//! 2. 404 / "not found" / " 404 " / "[404]" → [`ProviderError::NotFound`]
//! 3. delete service account + 400, delete ingestion key + "does not exist" /
//!    "no such" → [`ProviderError::NotFound`]
//! 4. "read-only" / "read only" → [`ProviderError::ReadOnly`]
//! 5. update policy + 409 / "conflict" → [`ProviderError::Conflict`]
//! 6. anything else → [`ProviderError::Api`]

use std::fmt;

use tracing::debug;

use crate::error::ProviderError;

/// The kind of call being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Create a new entity.
    Create,
    /// Read a single entity.
    Read,
    /// Update an existing entity.
    Update,
    /// Delete an entity.
    Delete,
    /// List entities.
    List,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
        })
    }
}

/// The managed entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    /// RBAC policy.
    Policy,
    /// Service account.
    ServiceAccount,
    /// API key bound to a service account.
    ApiKey,
    /// Dashboard.
    Dashboard,
    /// Monitor silence.
    Silence,
    /// Connected app (notification target).
    ConnectedApp,
    /// Data integration (data source config).
    DataIntegration,
    /// Ingestion key.
    IngestionKey,
    /// Global logs pipeline configuration.
    LogsPipeline,
    /// Global metrics aggregation configuration.
    MetricsAggregation,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Policy => "policy",
            Self::ServiceAccount => "service account",
            Self::ApiKey => "api key",
            Self::Dashboard => "dashboard",
            Self::Silence => "silence",
            Self::ConnectedApp => "connected app",
            Self::DataIntegration => "data integration",
            Self::IngestionKey => "ingestion key",
            Self::LogsPipeline => "logs pipeline",
            Self::MetricsAggregation => "metrics aggregation",
        })
    }
}

/// An action performed on an entity, e.g. `update policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operation {
    /// What is being done.
    pub action: Action,
    /// What it is being done to.
    pub entity: Entity,
}

impl Operation {
    /// Create a new operation.
    pub const fn new(action: Action, entity: Entity) -> Self {
        Self { action, entity }
    }

    /// Shorthand for a create operation.
    pub const fn create(entity: Entity) -> Self {
        Self::new(Action::Create, entity)
    }

    /// Shorthand for a read operation.
    pub const fn read(entity: Entity) -> Self {
        Self::new(Action::Read, entity)
    }

    /// Shorthand for an update operation.
    pub const fn update(entity: Entity) -> Self {
        Self::new(Action::Update, entity)
    }

    /// Shorthand for a delete operation.
    pub const fn delete(entity: Entity) -> Self {
        Self::new(Action::Delete, entity)
    }

    /// Shorthand for a list operation.
    pub const fn list(entity: Entity) -> Self {
        Self::new(Action::List, entity)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.entity)
    }
}

/// A failed API call: the HTTP status (when there was a response) and the
/// composed error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    /// HTTP status code, if the server answered.
    pub status: Option<u16>,
    /// Human-readable error text.
    pub message: String,
}

impl ApiFailure {
    /// A failure carrying an HTTP status.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// A failure with no HTTP status.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

/// Classify a failed call.
///
/// `resource` is the name (for creates) or identifier of the entity involved and
/// ends up in the returned error. `None` in gives `None` out.
pub fn classify(
    failure: Option<&ApiFailure>,
    operation: Operation,
    resource: &str,
) -> Option<ProviderError> {
    let failure = failure?;
    let text = failure.message.to_lowercase();
    let status = failure.status;
    let conflict = status == Some(409) || text.contains("conflict");

    let error = if operation.action == Action::Create && conflict {
        ProviderError::AlreadyExists(format!(
            "{} named '{}' already exists",
            operation.entity, resource
        ))
    } else if is_not_found(status, &text) || is_soft_not_found(operation, status, &text) {
        ProviderError::NotFound(format!("{} '{}'", operation.entity, resource))
    } else if text.contains("read-only") || text.contains("read only") {
        ProviderError::ReadOnly(format!(
            "cannot {} {} '{}': {}",
            operation.action, operation.entity, resource, failure.message
        ))
    } else if operation == Operation::update(Entity::Policy) && conflict {
        ProviderError::Conflict(format!(
            "policy '{}' was changed by someone else since it was last read; refresh and retry",
            resource
        ))
    } else {
        ProviderError::Api {
            operation: operation.to_string(),
            resource: resource.to_string(),
            message: failure.message.clone(),
        }
    };

    debug!(
        operation = %operation,
        resource,
        status = ?status,
        kind = ?error.kind(),
        "Classified API failure"
    );
    Some(error)
}

/// Classify the error side of a result, passing success through.
pub fn classify_result<T>(
    result: Result<T, ApiFailure>,
    operation: Operation,
    resource: &str,
) -> Result<T, ProviderError> {
    result.map_err(|failure| {
        classify(Some(&failure), operation, resource).unwrap_or_else(|| ProviderError::Api {
            operation: operation.to_string(),
            resource: resource.to_string(),
            message: failure.message,
        })
    })
}

fn is_not_found(status: Option<u16>, text: &str) -> bool {
    status == Some(404)
        || text.contains("not found")
        || text.contains(" 404 ")
        || text.contains("[404]")
}

// Deletes the API reports in ways other than a 404 when the entity is already gone.
fn is_soft_not_found(operation: Operation, status: Option<u16>, text: &str) -> bool {
    match (operation.action, operation.entity) {
        (Action::Delete, Entity::ServiceAccount) => status == Some(400),
        (Action::Delete, Entity::IngestionKey) => {
            text.contains("does not exist") || text.contains("no such")
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn kind_of(failure: ApiFailure, operation: Operation) -> ErrorKind {
        classify(Some(&failure), operation, "res").unwrap().kind()
    }

    #[test]
    fn test_none_passes_through() {
        for op in [
            Operation::create(Entity::Policy),
            Operation::delete(Entity::IngestionKey),
            Operation::update(Entity::Policy),
        ] {
            assert!(classify(None, op, "anything").is_none());
        }
    }

    #[test]
    fn test_create_conflict_names_resource() {
        let failure = ApiFailure::with_status(409, "409 Conflict: policy exists");
        let err = classify(Some(&failure), Operation::create(Entity::Policy), "dup-policy").unwrap();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(err.to_string().contains("dup-policy"));

        // Text alone is enough.
        let failure = ApiFailure::message("name conflict");
        assert_eq!(
            kind_of(failure, Operation::create(Entity::Dashboard)),
            ErrorKind::AlreadyExists
        );
    }

    #[test]
    fn test_not_found_regardless_of_operation() {
        let ops = [
            Operation::read(Entity::Policy),
            Operation::update(Entity::Dashboard),
            Operation::delete(Entity::Silence),
            Operation::list(Entity::IngestionKey),
            Operation::create(Entity::ApiKey),
        ];
        for op in ops {
            assert_eq!(
                kind_of(ApiFailure::with_status(404, "gone"), op),
                ErrorKind::NotFound
            );
            assert_eq!(
                kind_of(ApiFailure::message("Policy Not Found"), op),
                ErrorKind::NotFound
            );
            assert_eq!(
                kind_of(ApiFailure::message("status [404] returned"), op),
                ErrorKind::NotFound
            );
            assert_eq!(
                kind_of(ApiFailure::message("got 404 from upstream"), op),
                ErrorKind::NotFound
            );
        }
    }

    #[test]
    fn test_softened_deletes() {
        assert_eq!(
            kind_of(
                ApiFailure::with_status(400, "400 Bad Request: invalid id"),
                Operation::delete(Entity::ServiceAccount)
            ),
            ErrorKind::NotFound
        );
        // Only the service account delete softens 400.
        assert_eq!(
            kind_of(
                ApiFailure::with_status(400, "400 Bad Request: invalid id"),
                Operation::delete(Entity::Policy)
            ),
            ErrorKind::Api
        );
        assert_eq!(
            kind_of(
                ApiFailure::with_status(500, "key does not exist"),
                Operation::delete(Entity::IngestionKey)
            ),
            ErrorKind::NotFound
        );
        assert_eq!(
            kind_of(
                ApiFailure::with_status(500, "key does not exist"),
                Operation::delete(Entity::ApiKey)
            ),
            ErrorKind::Api
        );
    }

    #[test]
    fn test_read_only() {
        assert_eq!(
            kind_of(
                ApiFailure::with_status(403, "policy is Read-Only"),
                Operation::update(Entity::Policy)
            ),
            ErrorKind::ReadOnly
        );
        assert_eq!(
            kind_of(
                ApiFailure::message("dashboard is read only"),
                Operation::delete(Entity::Dashboard)
            ),
            ErrorKind::ReadOnly
        );
    }

    #[test]
    fn test_update_policy_conflict() {
        assert_eq!(
            kind_of(
                ApiFailure::with_status(409, "revision mismatch"),
                Operation::update(Entity::Policy)
            ),
            ErrorKind::Conflict
        );
        // Other updates are not concurrency conflicts.
        assert_eq!(
            kind_of(
                ApiFailure::with_status(409, "revision mismatch"),
                Operation::update(Entity::Dashboard)
            ),
            ErrorKind::Api
        );
    }

    #[test]
    fn test_priority_order() {
        // Create conflict beats not-found text.
        assert_eq!(
            kind_of(
                ApiFailure::with_status(409, "conflict: parent not found"),
                Operation::create(Entity::ApiKey)
            ),
            ErrorKind::AlreadyExists
        );
        // Not-found beats read-only.
        assert_eq!(
            kind_of(
                ApiFailure::with_status(404, "read-only"),
                Operation::update(Entity::Policy)
            ),
            ErrorKind::NotFound
        );
        // Read-only beats update conflict.
        assert_eq!(
            kind_of(
                ApiFailure::with_status(409, "read-only policy"),
                Operation::update(Entity::Policy)
            ),
            ErrorKind::ReadOnly
        );
    }

    #[test]
    fn test_generic_wraps_operation_and_message() {
        let failure = ApiFailure::with_status(500, "500 Internal Server Error: boom");
        let err = classify(Some(&failure), Operation::update(Entity::Silence), "s-1").unwrap();
        assert_eq!(
            err.to_string(),
            "update silence failed for 's-1': 500 Internal Server Error: boom"
        );
    }

    #[test]
    fn test_classify_result() {
        let ok: Result<u8, ApiFailure> = Ok(7);
        assert_eq!(
            classify_result(ok, Operation::read(Entity::Policy), "p").unwrap(),
            7
        );

        let err: Result<u8, ApiFailure> = Err(ApiFailure::with_status(404, "missing"));
        let err = classify_result(err, Operation::read(Entity::Policy), "p").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(
            Operation::delete(Entity::ServiceAccount).to_string(),
            "delete service account"
        );
        assert_eq!(
            Operation::create(Entity::MetricsAggregation).to_string(),
            "create metrics aggregation"
        );
    }
}
