//! jsonbridge - dashboard backend adapter for JSON metrics services
//!
//! Receives batches of time-series queries from a dashboarding host, fans
//! each query out to a remote JSON-speaking metrics service and assembles the
//! decoded answers into one result per query.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`datasource`] - Request translation, upstream client, decoding and fan-out
//! - [`models`] - Queries, frames and result sets
//! - [`error`] - Per-query and batch-level error types
//! - [`metrics`] - Prometheus metrics
//! - [`server`] - HTTP surface for the host
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use jsonbridge::datasource::{ClientConfig, HttpUpstreamClient, InstanceSettings, QueryCoordinator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Arc::new(HttpUpstreamClient::new(&ClientConfig::default())?);
//!     let settings = Arc::new(InstanceSettings::new(1, "metrics", "http://localhost:3003")?);
//!     let coordinator = QueryCoordinator::new(client);
//!     let results = coordinator
//!         .query_data(settings, vec![], &CancellationToken::new())
//!         .await;
//!     assert!(results.is_empty());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod datasource;
pub mod error;
pub mod metrics;
pub mod models;
pub mod server;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::datasource::{JsonDatasource, QueryCoordinator, UpstreamClient};
    pub use crate::error::{Error, ErrorCategory, QueryError, Result};
    pub use crate::models::{BatchRequest, Frame, Query, QueryResult, ResultSet, TimeRange};
}

// Direct re-exports for convenience
pub use models::{BatchRequest, Query, QueryResult, ResultSet};
