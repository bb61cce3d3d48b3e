//! Hemmer provider for groundcover
//!
//! This crate manages groundcover observability resources (RBAC policies,
//! service accounts, API keys, dashboards, monitor silences, connected apps,
//! data integrations, ingestion keys, and the logs pipeline and metrics
//! aggregation documents) from Hemmer.
//!
//! # Overview
//!
//! - **[`GroundcoverProvider`]**: the [`ProviderService`] implementation the
//!   host drives through configure, plan, apply and import
//! - **Resources**: one adapter per entity type behind the
//!   [`resources::Resource`] trait
//! - **Client**: [`client::ApiClient`], a typed codec over a layered
//!   [`transport`] stack with retry on rate limiting
//! - **Errors**: [`ProviderError`], classified from API failures by
//!   [`classify`]
//! - **Logging**: integration with `tracing`, written to stderr
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_provider_groundcover::{init_logging, GroundcoverProvider, ProviderService};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let provider = GroundcoverProvider::new();
//!     provider
//!         .configure(json!({
//!             "api_url": "https://api.groundcover.com",
//!             "api_key": std::env::var("GROUNDCOVER_API_KEY")?,
//!             "backend_id": "prod",
//!         }))
//!         .await?;
//!
//!     let state = provider
//!         .create(
//!             "groundcover_policy",
//!             json!({"name": "readers", "role": {"read": "*"}}),
//!         )
//!         .await?;
//!     tracing::info!(uuid = %state["uuid"], "Policy created");
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! `api_url`, `api_key` and `backend_id` come from the provider block or the
//! `GROUNDCOVER_API_URL`, `GROUNDCOVER_API_KEY` and `GROUNDCOVER_BACKEND_ID`
//! environment variables. See [`config`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod json_diff;
pub mod logging;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod service;
pub mod testing;
pub mod transport;
pub mod types;
pub mod validation;
pub mod value;

// Re-export main types at crate root
pub use error::{ErrorKind, ProviderError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::GroundcoverProvider;
pub use schema::ProviderSchema;
pub use service::ProviderService;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate};
pub use value::DynamicValue;

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
