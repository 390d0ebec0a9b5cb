//! HTTP server exposing the query pipeline to the host
//!
//! ```text
//! POST /api/ds/query   run a query batch
//! GET  /metrics        Prometheus metrics
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use jsonbridge::config::Config;
//! use jsonbridge::server::BridgeServer;
//!
//! let server = BridgeServer::new(Config::from_env()?)?;
//! server.start_with_shutdown(shutdown_signal()).await?;
//! ```

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::datasource::{ClientConfig, HttpUpstreamClient, InstanceRegistry, JsonDatasource};

pub use api::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub datasource: Arc<JsonDatasource>,
}

impl AppState {
    pub fn new(datasource: Arc<JsonDatasource>) -> Self {
        Self { datasource }
    }
}

// ============================================================================
// Bridge Server
// ============================================================================

/// HTTP front of the adapter
pub struct BridgeServer {
    config: Config,
    state: AppState,
}

impl BridgeServer {
    /// Create a new server, building the shared upstream client once
    pub fn new(config: Config) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let instances = config
            .instance_settings()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;
        let registry = Arc::new(InstanceRegistry::with_instances(instances));
        if registry.is_empty() {
            tracing::warn!("No datasources configured; every batch will be rejected");
        }

        let client = HttpUpstreamClient::new(&ClientConfig::from(&config.upstream))
            .map_err(|e| ServerError::InitError(e.to_string()))?;

        let datasource = Arc::new(JsonDatasource::new(registry, Arc::new(client)));

        Ok(Self {
            state: AppState::new(datasource),
            config,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.server.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.server.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Address the server binds to
    pub fn bind_address(&self) -> SocketAddr {
        self.config.server.bind_address
    }

    /// Start with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.bind_address();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        tracing::info!(
            address = %addr,
            datasources = self.state.datasource.registry().len(),
            "jsonbridge server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        tracing::info!("jsonbridge server shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Initialization error
    #[error("Initialization error: {0}")]
    InitError(String),

    /// Failed to bind to address
    #[error("Failed to bind: {0}")]
    BindError(String),

    /// Server error
    #[error("Server error: {0}")]
    ServeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasourceConfig;

    #[test]
    fn test_server_creation() {
        let mut config = Config::default();
        config.datasources.push(DatasourceConfig {
            id: 1,
            name: "metrics".to_string(),
            url: "http://localhost:3003".to_string(),
        });

        let server = BridgeServer::new(config).unwrap();
        assert_eq!(server.bind_address().port(), 8080);
    }

    #[test]
    fn test_server_rejects_invalid_config() {
        let mut config = Config::default();
        config.upstream.connect_timeout_secs = 0;

        assert!(matches!(
            BridgeServer::new(config),
            Err(ServerError::ConfigError(_))
        ));
    }
}
