//! Read-only MCP resources addressed by `servicenow://` URIs

use super::catalog::ResourceDescriptor;
use crate::error::{Result, ServiceNowError};
use crate::services::{ChangeRequestService, ChangeSearch, IncidentSearch, IncidentService};
use crate::types::change_state;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const RECENT_INCIDENTS_URI: &str = "servicenow://incidents/recent";
pub const PENDING_CHANGES_URI: &str = "servicenow://changes/pending";

/// Records returned by each resource read
const RESOURCE_PAGE_SIZE: u32 = 10;

/// A readable resource
#[async_trait]
pub trait McpResource: Send + Sync {
    fn descriptor(&self) -> ResourceDescriptor;

    /// Current contents as text
    async fn read(&self) -> Result<String>;
}

struct Entry {
    descriptor: ResourceDescriptor,
    resource: Arc<dyn McpResource>,
}

/// URI → resource map
pub struct ResourceRegistry {
    entries: Vec<Entry>,
    by_uri: HashMap<String, usize>,
    listing: Value,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            by_uri: HashMap::new(),
            listing: json!({ "resources": [] }),
        }
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the recent-incidents and pending-changes resources
    pub fn servicenow(
        incidents: Arc<dyn IncidentService>,
        changes: Arc<dyn ChangeRequestService>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(RecentIncidents::new(incidents))?;
        registry.register(PendingChanges::new(changes))?;
        Ok(registry)
    }

    /// Add a resource; URIs must be unique
    pub fn register(&mut self, resource: impl McpResource + 'static) -> Result<()> {
        let descriptor = resource.descriptor();
        if self.by_uri.contains_key(&descriptor.uri) {
            return Err(ServiceNowError::McpProtocol(format!(
                "duplicate resource URI: {}",
                descriptor.uri
            )));
        }

        debug!("Registering resource: {}", descriptor.uri);
        self.by_uri.insert(descriptor.uri.clone(), self.entries.len());
        self.entries.push(Entry {
            descriptor,
            resource: Arc::new(resource),
        });

        let descriptors: Vec<&ResourceDescriptor> =
            self.entries.iter().map(|entry| &entry.descriptor).collect();
        self.listing = json!({ "resources": serde_json::to_value(descriptors)? });
        Ok(())
    }

    /// `resources/list` result
    pub fn listing(&self) -> &Value {
        &self.listing
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `resources/read` result for `uri`.
    ///
    /// Fails with `UnknownResource` when nothing is registered under `uri`.
    pub async fn read(&self, uri: &str) -> Result<Value> {
        let entry = self
            .by_uri
            .get(uri)
            .map(|&index| &self.entries[index])
            .ok_or_else(|| ServiceNowError::UnknownResource(uri.to_string()))?;

        info!("Reading resource: {}", uri);
        let text = entry.resource.read().await?;

        Ok(json!({
            "contents": [{
                "uri": entry.descriptor.uri,
                "mimeType": entry.descriptor.mime_type,
                "text": text
            }]
        }))
    }
}

/// Ten most recently created incidents
pub struct RecentIncidents {
    incidents: Arc<dyn IncidentService>,
}

impl RecentIncidents {
    pub fn new(incidents: Arc<dyn IncidentService>) -> Self {
        Self { incidents }
    }
}

#[async_trait]
impl McpResource for RecentIncidents {
    fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor::json(
            RECENT_INCIDENTS_URI,
            "Recent Incidents",
            "List of recent incidents",
        )
    }

    async fn read(&self) -> Result<String> {
        let incidents = self
            .incidents
            .search(IncidentSearch {
                limit: Some(RESOURCE_PAGE_SIZE),
                order_by: Some("sys_created_on".to_string()),
                order_desc: true,
                ..Default::default()
            })
            .await?;
        Ok(serde_json::to_string_pretty(&incidents)?)
    }
}

/// Change requests waiting in the Assess state
pub struct PendingChanges {
    changes: Arc<dyn ChangeRequestService>,
}

impl PendingChanges {
    pub fn new(changes: Arc<dyn ChangeRequestService>) -> Self {
        Self { changes }
    }
}

#[async_trait]
impl McpResource for PendingChanges {
    fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor::json(
            PENDING_CHANGES_URI,
            "Pending Changes",
            "List of pending change requests",
        )
    }

    async fn read(&self) -> Result<String> {
        let changes = self
            .changes
            .search(ChangeSearch {
                state: Some(change_state::ASSESS),
                limit: Some(RESOURCE_PAGE_SIZE),
                ..Default::default()
            })
            .await?;
        Ok(serde_json::to_string_pretty(&changes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockChangeRequestService, MockIncidentService};
    use crate::types::{ChangeRequest, Incident};

    #[tokio::test]
    async fn test_recent_incidents_query() {
        let mut incidents = MockIncidentService::new();
        incidents
            .expect_search()
            .withf(|search| {
                search.limit == Some(10)
                    && search.order_by.as_deref() == Some("sys_created_on")
                    && search.order_desc
            })
            .times(1)
            .returning(|_| {
                Ok(vec![Incident {
                    number: Some("INC0010009".to_string()),
                    ..Default::default()
                }])
            });

        let registry =
            ResourceRegistry::servicenow(Arc::new(incidents), Arc::new(MockChangeRequestService::new()))
                .unwrap();
        let result = registry.read(RECENT_INCIDENTS_URI).await.unwrap();

        assert_eq!(result["contents"][0]["uri"], RECENT_INCIDENTS_URI);
        assert_eq!(result["contents"][0]["mimeType"], "application/json");
        let text = result["contents"][0]["text"].as_str().unwrap();
        assert!(text.contains("INC0010009"));
    }

    #[tokio::test]
    async fn test_pending_changes_query() {
        let mut changes = MockChangeRequestService::new();
        changes
            .expect_search()
            .withf(|search| search.state == Some(-4) && search.limit == Some(10))
            .times(1)
            .returning(|_| Ok(vec![ChangeRequest::default()]));

        let registry =
            ResourceRegistry::servicenow(Arc::new(MockIncidentService::new()), Arc::new(changes))
                .unwrap();
        assert!(registry.read(PENDING_CHANGES_URI).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_uri() {
        let registry = ResourceRegistry::servicenow(
            Arc::new(MockIncidentService::new()),
            Arc::new(MockChangeRequestService::new()),
        )
        .unwrap();

        let result = registry.read("servicenow://problems/all").await;
        assert!(matches!(result, Err(ServiceNowError::UnknownResource(uri)) if uri == "servicenow://problems/all"));
    }

    #[test]
    fn test_duplicate_uri_rejected() {
        let incidents: Arc<dyn IncidentService> = Arc::new(MockIncidentService::new());
        let mut registry = ResourceRegistry::new();
        registry
            .register(RecentIncidents::new(incidents.clone()))
            .unwrap();

        assert!(registry.register(RecentIncidents::new(incidents)).is_err());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.listing()["resources"][0]["name"], "Recent Incidents");
    }
}
