//! HTTP client for the upstream JSON service
//!
//! One [`HttpUpstreamClient`] is built at startup and shared by every batch.
//! Its connection pool is the only mutable state shared between concurrently
//! running queries; `reqwest` synchronizes it internally.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::request::UpstreamRequest;
use crate::config::UpstreamConfig;
use crate::error::{Error, QueryError};
use crate::metrics;

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the upstream client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hard ceiling for a whole request, including reading the body
    pub timeout: Duration,

    /// Ceiling for establishing a connection, TLS handshake included
    pub connect_timeout: Duration,

    /// Idle connections kept per upstream host
    pub pool_max_idle_per_host: usize,

    /// How long an idle connection may stay in the pool
    pub pool_idle_timeout: Duration,

    /// User agent sent upstream
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 100,
            pool_idle_timeout: Duration::from_secs(90),
            user_agent: format!("jsonbridge/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl From<&UpstreamConfig> for ClientConfig {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.request_timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            pool_max_idle_per_host: config.pool_max_idle_per_host,
            pool_idle_timeout: Duration::from_secs(config.pool_idle_timeout_secs),
            user_agent: config.user_agent.clone(),
        }
    }
}

// ============================================================================
// Upstream Client
// ============================================================================

/// Executes one upstream request and returns the raw response body
///
/// Implementations make exactly one attempt per call. Retrying is left to
/// callers.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send the request, aborting with `QueryError::Cancelled` as soon as
    /// `cancel` fires
    async fn execute(
        &self,
        request: UpstreamRequest,
        cancel: &CancellationToken,
    ) -> Result<Bytes, QueryError>;
}

/// `reqwest`-backed upstream client
#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    http_client: Client,
}

impl HttpUpstreamClient {
    /// Create a new client with its own connection pool
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the underlying client cannot be built
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()?;

        Ok(Self { http_client })
    }

    async fn send(&self, request: UpstreamRequest) -> Result<Bytes, QueryError> {
        tracing::debug!(url = %request.url, bytes = request.body.len(), "Posting query upstream");

        let response = self
            .http_client
            .post(&request.url)
            .header(CONTENT_TYPE, "application/json")
            .body(request.body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = status.canonical_reason().unwrap_or_default().to_string();
            tracing::error!(status = status.as_u16(), url = %request.url, "Invalid upstream status code");
            return Err(QueryError::UpstreamStatus {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn execute(
        &self,
        request: UpstreamRequest,
        cancel: &CancellationToken,
    ) -> Result<Bytes, QueryError> {
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueryError::Cancelled),
            result = self.send(request) => result,
        };

        metrics::observe_upstream_request(started.elapsed().as_secs_f64());
        result
    }
}

// ============================================================================
// Tests
// ============================================================================
