//! Datasource instance settings and lookup
//!
//! A batch names its target instance through a [`PluginContext`]. The
//! registry turns that into resolved [`InstanceSettings`]; failing to do so
//! is the only way a whole batch can fail.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::PluginContext;

/// Resolved connection settings of one datasource instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSettings {
    pub id: i64,
    pub name: String,
    /// Base URL without trailing slash
    pub url: String,
}

impl InstanceSettings {
    /// Create settings, validating the base URL
    pub fn new(id: i64, name: impl Into<String>, url: &str) -> Result<Self> {
        let trimmed = url.trim().trim_end_matches('/');
        let parsed = url::Url::parse(trimmed)
            .map_err(|e| Error::InvalidInstance(format!("invalid url '{url}': {e}")))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidInstance(format!(
                "unsupported url scheme '{}' for datasource {id}",
                parsed.scheme()
            )));
        }

        Ok(Self {
            id,
            name: name.into(),
            url: trimmed.to_string(),
        })
    }

    /// Endpoint queries are posted to
    pub fn query_url(&self) -> String {
        format!("{}/query", self.url)
    }
}

/// Registry of known datasource instances, fixed once the process starts
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: HashMap<i64, Arc<InstanceSettings>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with the given instances
    pub fn with_instances(instances: impl IntoIterator<Item = InstanceSettings>) -> Self {
        let instances = instances
            .into_iter()
            .map(|settings| {
                tracing::debug!(id = settings.id, url = %settings.url, "Registering datasource instance");
                (settings.id, Arc::new(settings))
            })
            .collect();
        Self { instances }
    }

    /// Resolve the instance a batch is addressed to
    pub fn resolve(&self, context: &PluginContext) -> Result<Arc<InstanceSettings>> {
        self.instances
            .get(&context.datasource_id)
            .cloned()
            .ok_or(Error::InstanceNotFound(context.datasource_id))
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
