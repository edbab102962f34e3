//! Domain operations invoked by MCP tools and resources
//!
//! Each service is a trait so the dispatcher can be wired to ServiceNow or to
//! a test double. The ServiceNow-backed implementations map typed arguments
//! onto table API field sets.

pub mod change;
pub mod incident;
pub mod user;

pub use change::ServiceNowChangeRequests;
pub use incident::ServiceNowIncidents;
pub use user::ServiceNowUsers;

use crate::error::Result;
use crate::types::{ChangeRequest, Incident, User};
use async_trait::async_trait;
use serde::Deserialize;

/// Default page size for searches
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;

/// Largest page a search may request
pub const MAX_SEARCH_LIMIT: u32 = 1000;

/// Arguments for creating an incident
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewIncident {
    pub short_description: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "flexible::int")]
    pub urgency: Option<i32>,
    #[serde(default, deserialize_with = "flexible::int")]
    pub impact: Option<i32>,
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub assignment_group: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
}

/// Arguments for patching an incident
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IncidentUpdate {
    pub sys_id: String,
    #[serde(default, deserialize_with = "flexible::int")]
    pub state: Option<i32>,
    #[serde(default)]
    pub work_notes: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub close_code: Option<String>,
    #[serde(default)]
    pub close_notes: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

/// Incident list query
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IncidentSearch {
    /// Encoded query, e.g. `active=true^priority=1`
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default, deserialize_with = "flexible::uint")]
    pub limit: Option<u32>,
    #[serde(default, deserialize_with = "flexible::uint")]
    pub offset: Option<u32>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub order_desc: bool,
}

/// Change request list query
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChangeSearch {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default, deserialize_with = "flexible::int")]
    pub state: Option<i32>,
    #[serde(default, deserialize_with = "flexible::uint")]
    pub limit: Option<u32>,
}

/// User lookup
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserSearch {
    /// Matched against user name, first/last name and email
    pub query: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default, deserialize_with = "flexible::uint")]
    pub limit: Option<u32>,
}

/// Incident operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IncidentService: Send + Sync {
    /// Create an incident in state New
    async fn create(&self, incident: NewIncident) -> Result<Incident>;

    /// Patch an incident by sys_id
    async fn update(&self, update: IncidentUpdate) -> Result<Incident>;

    /// Look up by sys_id or incident number
    async fn get(&self, identifier: &str) -> Result<Incident>;

    /// List incidents
    async fn search(&self, search: IncidentSearch) -> Result<Vec<Incident>>;
}

/// Change request operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeRequestService: Send + Sync {
    /// List change requests
    async fn search(&self, search: ChangeSearch) -> Result<Vec<ChangeRequest>>;
}

/// User operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserService: Send + Sync {
    /// Find users by name or email
    async fn search(&self, search: UserSearch) -> Result<Vec<User>>;
}

fn clamp_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT)
}

/// Agents send numeric fields as numbers or strings ("2"); accept both.
mod flexible {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn int<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("expected an integer, got {}", n))),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i32>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("expected an integer, got '{}'", s))),
            Some(other) => Err(D::Error::custom(format!(
                "expected an integer, got {}",
                other
            ))),
        }
    }

    pub fn uint<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match int(deserializer)? {
            None => Ok(None),
            Some(v) => u32::try_from(v)
                .map(Some)
                .map_err(|_| D::Error::custom(format!("expected a non-negative integer, got {}", v))),
        }
    }
}
