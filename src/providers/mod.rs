pub mod github;
pub mod jira;

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::error::RemoteError;
use crate::model::external_id::ExternalId;
use crate::model::mapping::BoardMapping;
use crate::model::remote_item::{FieldDelta, NewRemoteItem, RemoteItem};

/// Uniform capability set over one remote work-tracking system.
///
/// Each instance is bound to a single mapping's project.
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    /// Name stored as the card's external system name.
    fn name(&self) -> &str;

    async fn list_changed_since(&self, since: DateTime<Utc>) -> Result<Vec<RemoteItem>, RemoteError>;

    async fn fetch(&self, id: &ExternalId) -> Result<RemoteItem, RemoteError>;

    async fn create(&self, fields: &NewRemoteItem) -> Result<RemoteItem, RemoteError>;

    /// Apply a field delta. Fields the system has no concept of are recorded
    /// as a comment rather than failing.
    async fn patch(&self, id: &ExternalId, delta: &FieldDelta) -> Result<(), RemoteError>;

    /// States reachable in one hop from the item's current state.
    async fn list_valid_transitions(&self, id: &ExternalId) -> Result<Vec<String>, RemoteError>;

    async fn transition(&self, id: &ExternalId, state: &str) -> Result<(), RemoteError>;

    async fn add_comment(&self, id: &ExternalId, text: &str) -> Result<(), RemoteError>;
}

pub type AdapterFactory = fn(&AppConfig, &BoardMapping) -> Result<Box<dyn RemoteAdapter>>;

/// Maps a configured system name to the factory that builds its adapter.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with the built-in adapters.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("jira", jira::JiraAdapter::from_config);
        registry.register("github", github::GitHubAdapter::from_config);
        registry
    }

    pub fn register(&mut self, name: &str, factory: AdapterFactory) {
        self.factories.insert(name.trim().to_ascii_lowercase(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn create(&self, config: &AppConfig, mapping: &BoardMapping) -> Result<Box<dyn RemoteAdapter>> {
        let key = mapping.target_system.trim().to_ascii_lowercase();
        match self.factories.get(&key) {
            Some(factory) => factory(config, mapping),
            None => bail!(
                "No adapter registered for target system '{}' (known: {})",
                mapping.target_system,
                self.names().join(", ")
            ),
        }
    }
}

/// Classify a failed `send()` as a transient transport failure.
pub(crate) fn transport_error(system: &str, err: reqwest::Error) -> RemoteError {
    RemoteError::transient(system, err.to_string())
}

/// Turn a non-success response into a `RemoteError`, passing success through.
pub(crate) async fn check_status(
    system: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::from_status(system, status, &body))
}

pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    system: &str,
    resp: reqwest::Response,
) -> Result<T, RemoteError> {
    let resp = check_status(system, resp).await?;
    resp.json()
        .await
        .map_err(|e| RemoteError::transient(system, format!("Failed to parse response: {e}")))
}
