//! Error types for the groundcover provider.

use thiserror::Error;

/// Errors that can occur while managing groundcover resources.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found upstream.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A resource with the same name already exists (create-time 409).
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// The resource was modified concurrently (stale revision).
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// The resource is read-only and cannot be changed.
    #[error("Resource is read-only: {0}")]
    ReadOnly(String),

    /// The API rejected the call for any other reason.
    #[error("{operation} failed for '{resource}': {message}")]
    Api {
        /// The operation that failed, e.g. `create policy`.
        operation: String,
        /// Name or identifier of the resource involved.
        resource: String,
        /// The message reported by the API or the network layer.
        message: String,
    },

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A request body could not be encoded.
    #[error("Failed to encode request body: {0}")]
    Encode(String),

    /// A response body could not be decoded.
    #[error("Failed to decode response body: {0}")]
    Decode(String),

    /// Resource state could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// Invalid request from client (e.g. a malformed import identifier).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// The call was cancelled by the caller.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The call did not finish before its deadline.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// An HTTP transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// The closed set of error kinds, for matching without inspecting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`ProviderError::NotFound`].
    NotFound,
    /// See [`ProviderError::AlreadyExists`].
    AlreadyExists,
    /// See [`ProviderError::Conflict`].
    Conflict,
    /// See [`ProviderError::ReadOnly`].
    ReadOnly,
    /// See [`ProviderError::Api`].
    Api,
    /// See [`ProviderError::Configuration`].
    Configuration,
    /// Request encoding, response decoding, or state (de)serialization.
    Serialization,
    /// See [`ProviderError::Validation`].
    Validation,
    /// See [`ProviderError::UnknownResource`].
    UnknownResource,
    /// See [`ProviderError::InvalidRequest`].
    InvalidRequest,
    /// See [`ProviderError::FailedPrecondition`].
    FailedPrecondition,
    /// See [`ProviderError::Cancelled`].
    Cancelled,
    /// See [`ProviderError::DeadlineExceeded`].
    DeadlineExceeded,
    /// See [`ProviderError::Transport`].
    Transport,
}

impl ProviderError {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::ReadOnly(_) => ErrorKind::ReadOnly,
            Self::Api { .. } => ErrorKind::Api,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Encode(_) | Self::Decode(_) | Self::Serialization(_) => {
                ErrorKind::Serialization
            },
            Self::Validation(_) => ErrorKind::Validation,
            Self::UnknownResource(_) => ErrorKind::UnknownResource,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Whether this error means the resource does not exist upstream.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Get the error message as a string.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg)
            | Self::AlreadyExists(msg)
            | Self::Conflict(msg)
            | Self::ReadOnly(msg)
            | Self::Configuration(msg)
            | Self::Encode(msg)
            | Self::Decode(msg)
            | Self::Validation(msg)
            | Self::UnknownResource(msg)
            | Self::InvalidRequest(msg)
            | Self::FailedPrecondition(msg)
            | Self::Cancelled(msg)
            | Self::DeadlineExceeded(msg) => msg,
            Self::Api { message, .. } => message,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::Transport(_err) => "transport error (see Debug output)",
        }
    }

    /// Point a name collision at the attribute the user has to change.
    ///
    /// Other errors are returned unchanged.
    pub fn with_conflicting_attribute(self, attribute: &str) -> Self {
        match self {
            Self::AlreadyExists(msg) => Self::AlreadyExists(format!(
                "{msg}; change the '{attribute}' attribute to a unique value"
            )),
            other => other,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = ProviderError> = std::result::Result<T, E>;
