//! MCP tool implementations
//!
//! Each tool is an [`McpTool`] registered by name in a [`ToolRegistry`]. The
//! registry validates required arguments before a handler runs and turns
//! every failure into an `isError` result.

use super::catalog::{InputSchema, PropertySchema, ToolCallResult, ToolDescriptor};
use crate::error::{Result, ServiceNowError};
use crate::services::{IncidentService, IncidentUpdate, NewIncident, UserSearch, UserService};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A callable tool
#[async_trait]
pub trait McpTool: Send + Sync {
    /// Name, description and argument schema
    fn descriptor(&self) -> ToolDescriptor;

    /// Run with arguments whose required fields are already present
    async fn call(&self, arguments: Map<String, Value>) -> Result<String>;
}

/// Decode tool arguments into a typed struct
fn parse_args<T: DeserializeOwned>(arguments: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|e| ServiceNowError::InvalidArgument(e.to_string()))
}

struct Entry {
    descriptor: ToolDescriptor,
    tool: Arc<dyn McpTool>,
}

/// Name → tool map, immutable once the server starts
pub struct ToolRegistry {
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
    listing: Value,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
            listing: json!({ "tools": [] }),
        }
    }
}

impl ToolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four incident and user tools
    pub fn servicenow(
        incidents: Arc<dyn IncidentService>,
        users: Arc<dyn UserService>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(CreateIncidentTool::new(incidents.clone()))?;
        registry.register(UpdateIncidentTool::new(incidents.clone()))?;
        registry.register(GetIncidentTool::new(incidents))?;
        registry.register(SearchUsersTool::new(users))?;
        Ok(registry)
    }

    /// Add a tool; names must be unique
    pub fn register(&mut self, tool: impl McpTool + 'static) -> Result<()> {
        let descriptor = tool.descriptor();
        if self.by_name.contains_key(&descriptor.name) {
            return Err(ServiceNowError::McpProtocol(format!(
                "duplicate tool name: {}",
                descriptor.name
            )));
        }

        debug!("Registering tool: {}", descriptor.name);
        self.by_name
            .insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(Entry {
            descriptor,
            tool: Arc::new(tool),
        });

        let descriptors: Vec<&ToolDescriptor> =
            self.entries.iter().map(|entry| &entry.descriptor).collect();
        self.listing = json!({ "tools": serde_json::to_value(descriptors)? });
        Ok(())
    }

    /// `tools/list` result, in registration order
    pub fn listing(&self) -> &Value {
        &self.listing
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.descriptor.name.as_str())
    }

    /// Invoke a tool by name; never fails at the protocol level
    pub async fn call(&self, name: &str, arguments: Value) -> ToolCallResult {
        match self.try_call(name, arguments).await {
            Ok(text) => ToolCallResult::text(text),
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                ToolCallResult::failure(&e)
            }
        }
    }

    async fn try_call(&self, name: &str, arguments: Value) -> Result<String> {
        let entry = self
            .by_name
            .get(name)
            .map(|&index| &self.entries[index])
            .ok_or_else(|| ServiceNowError::UnknownTool(name.to_string()))?;

        let arguments = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(ServiceNowError::InvalidArgument(format!(
                    "arguments must be an object, got {}",
                    other
                )))
            }
        };

        if let Some(field) = entry.descriptor.input_schema.missing_field(&arguments) {
            return Err(ServiceNowError::MissingArgument {
                tool: name.to_string(),
                field: field.to_string(),
            });
        }

        info!("Tool call: {}", name);
        entry.tool.call(arguments).await
    }
}

/// `create_incident`
pub struct CreateIncidentTool {
    incidents: Arc<dyn IncidentService>,
}

impl CreateIncidentTool {
    pub fn new(incidents: Arc<dyn IncidentService>) -> Self {
        Self { incidents }
    }
}

#[async_trait]
impl McpTool for CreateIncidentTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "create_incident",
            "Create a new incident in ServiceNow",
            InputSchema::new()
                .required(
                    "short_description",
                    PropertySchema::string("Brief description of the incident"),
                )
                .property(
                    "description",
                    PropertySchema::string("Detailed description of the incident"),
                )
                .property(
                    "urgency",
                    PropertySchema::string("Urgency level (1-3)").one_of(["1", "2", "3"]),
                )
                .property(
                    "impact",
                    PropertySchema::string("Impact level (1-3)").one_of(["1", "2", "3"]),
                )
                .property(
                    "assignment_group",
                    PropertySchema::string("Group to assign the incident to"),
                )
                .property(
                    "caller_id",
                    PropertySchema::string("sys_id or user name of the caller"),
                )
                .property("category", PropertySchema::string("Incident category"))
                .property("subcategory", PropertySchema::string("Incident subcategory")),
        )
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<String> {
        let incident: NewIncident = parse_args(arguments)?;
        let created = self.incidents.create(incident).await?;

        Ok(format!(
            "Created incident {} (sys_id: {})",
            created.number.as_deref().unwrap_or_default(),
            created.sys_id.as_deref().unwrap_or_default()
        ))
    }
}

/// `update_incident`
pub struct UpdateIncidentTool {
    incidents: Arc<dyn IncidentService>,
}

impl UpdateIncidentTool {
    pub fn new(incidents: Arc<dyn IncidentService>) -> Self {
        Self { incidents }
    }
}

#[async_trait]
impl McpTool for UpdateIncidentTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "update_incident",
            "Update an existing incident",
            InputSchema::new()
                .required("sys_id", PropertySchema::string("System ID of the incident"))
                .property(
                    "state",
                    PropertySchema::string(
                        "Incident state (1 New, 2 In Progress, 3 On Hold, 6 Resolved, 7 Closed, 8 Cancelled)",
                    ),
                )
                .property("work_notes", PropertySchema::string("Work notes to add"))
                .property(
                    "comments",
                    PropertySchema::string("Additional comments visible to the caller"),
                )
                .property("close_code", PropertySchema::string("Resolution code"))
                .property("close_notes", PropertySchema::string("Resolution notes"))
                .property(
                    "assigned_to",
                    PropertySchema::string("sys_id or user name of the assignee"),
                ),
        )
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<String> {
        let update: IncidentUpdate = parse_args(arguments)?;
        let updated = self.incidents.update(update).await?;

        Ok(format!(
            "Updated incident {}",
            updated.number.as_deref().unwrap_or_default()
        ))
    }
}

/// `get_incident`
pub struct GetIncidentTool {
    incidents: Arc<dyn IncidentService>,
}

impl GetIncidentTool {
    pub fn new(incidents: Arc<dyn IncidentService>) -> Self {
        Self { incidents }
    }
}

#[async_trait]
impl McpTool for GetIncidentTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "get_incident",
            "Get incident details by number or sys_id",
            InputSchema::new().required(
                "identifier",
                PropertySchema::string("Incident number or sys_id"),
            ),
        )
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<String> {
        let identifier = match arguments.get("identifier") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let incident = self.incidents.get(&identifier).await?;
        Ok(serde_json::to_string_pretty(&incident)?)
    }
}

/// `search_users`
pub struct SearchUsersTool {
    users: Arc<dyn UserService>,
}

impl SearchUsersTool {
    pub fn new(users: Arc<dyn UserService>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl McpTool for SearchUsersTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "search_users",
            "Search for ServiceNow users",
            InputSchema::new()
                .required(
                    "query",
                    PropertySchema::string("Search query for users (name, user name or email)"),
                )
                .property("department", PropertySchema::string("Department name filter"))
                .property("active", PropertySchema::boolean("Only active (true) or inactive (false) users"))
                .property("limit", PropertySchema::integer("Maximum number of users (default 10)")),
        )
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<String> {
        let search: UserSearch = parse_args(arguments)?;
        let users = self.users.search(search).await?;
        Ok(serde_json::to_string_pretty(&users)?)
    }
}
