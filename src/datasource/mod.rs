//! Query pipeline for the JSON datasource
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               JsonDatasource                 │
//! │  resolve instance ─▶ validate batch          │
//! │                                              │
//! │  ┌────────────────────────────────────────┐  │
//! │  │           QueryCoordinator             │  │
//! │  │  one task per query:                   │  │
//! │  │    request ─▶ client ─▶ decoder        │  │
//! │  │  join all ─▶ ResultSet                 │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use jsonbridge::datasource::{ClientConfig, HttpUpstreamClient, InstanceRegistry, JsonDatasource};
//!
//! let client = Arc::new(HttpUpstreamClient::new(&ClientConfig::default())?);
//! let datasource = JsonDatasource::new(Arc::new(InstanceRegistry::new()), client);
//! let results = datasource.query_data(batch, &CancellationToken::new()).await?;
//! ```

pub mod client;
pub mod coordinator;
pub mod decoder;
pub mod instance;
pub mod request;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{BatchRequest, ResultSet};

// Re-export main types
pub use client::{ClientConfig, HttpUpstreamClient, UpstreamClient};
pub use coordinator::{QueryCoordinator, QueryStage};
pub use decoder::decode_response;
pub use instance::{InstanceRegistry, InstanceSettings};
pub use request::{build_query_request, UpstreamRequest};

/// Entry point for batches coming from the host
pub struct JsonDatasource {
    registry: Arc<InstanceRegistry>,
    coordinator: QueryCoordinator,
}

impl JsonDatasource {
    pub fn new(registry: Arc<InstanceRegistry>, client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            registry,
            coordinator: QueryCoordinator::new(client),
        }
    }

    /// Registry used to resolve plugin contexts
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Run a batch and return one result per query
    ///
    /// # Errors
    ///
    /// Fails only when the batch as a whole is unusable: the datasource
    /// instance is unknown or the ref ids are not unique. Per-query failures
    /// are reported inside the returned [`ResultSet`].
    pub async fn query_data(
        &self,
        request: BatchRequest,
        cancel: &CancellationToken,
    ) -> Result<ResultSet> {
        let settings = self
            .registry
            .resolve(&request.plugin_context)
            .inspect_err(|e| tracing::error!(error = %e, "Failed to resolve datasource instance"))?;

        request.validate()?;

        let span = tracing::info_span!(
            "batch",
            batch_id = %Uuid::new_v4(),
            datasource_id = settings.id,
            queries = request.queries.len(),
        );

        Ok(self
            .coordinator
            .query_data(settings, request.queries, cancel)
            .instrument(span)
            .await)
    }
}
