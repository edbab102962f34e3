//! ServiceNow record models and table API envelopes
//!
//! ServiceNow serializes every field as a string (including numeric states),
//! so the models keep string values and leave interpretation to callers.

use serde::{Deserialize, Serialize};

/// Table names used by the domain services
pub mod tables {
    /// Incident table
    pub const INCIDENT: &str = "incident";
    /// Change request table
    pub const CHANGE_REQUEST: &str = "change_request";
    /// User table
    pub const USER: &str = "sys_user";
}

/// Incident state values
pub mod incident_state {
    pub const NEW: i32 = 1;
    pub const IN_PROGRESS: i32 = 2;
    pub const ON_HOLD: i32 = 3;
    pub const RESOLVED: i32 = 6;
    pub const CLOSED: i32 = 7;
    pub const CANCELLED: i32 = 8;
}

/// Change request state values
pub mod change_state {
    pub const NEW: i32 = -5;
    pub const ASSESS: i32 = -4;
    pub const AUTHORIZE: i32 = -3;
    pub const SCHEDULED: i32 = -2;
    pub const IMPLEMENT: i32 = -1;
    pub const REVIEW: i32 = 0;
    pub const CLOSED: i32 = 3;
    pub const CANCELLED: i32 = 4;
}

/// Impact and urgency share the same scale
pub mod impact {
    pub const HIGH: i32 = 1;
    pub const MEDIUM: i32 = 2;
    pub const LOW: i32 = 3;
}

/// Single-record response: `{"result": {...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct RecordResponse<T> {
    pub result: T,
}

/// Multi-record response: `{"result": [...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub result: Vec<T>,
}

/// Error body returned by the table API
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: Option<ErrorDetail>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    pub message: Option<String>,
    pub detail: Option<String>,
}

impl ErrorResponse {
    /// Human-readable message, `"message: detail"` when both are present
    pub fn describe(&self) -> Option<String> {
        let detail = self.error.as_ref()?;
        match (&detail.message, &detail.detail) {
            (Some(m), Some(d)) if !d.is_empty() => Some(format!("{}: {}", m, d)),
            (Some(m), _) => Some(m.clone()),
            (None, Some(d)) => Some(d.clone()),
            (None, None) => None,
        }
    }
}

/// Incident record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "reference::deserialize")]
    pub caller_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "reference::deserialize")]
    pub assignment_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "reference::deserialize")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_created_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_updated_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_updated_by: Option<String>,
}

/// Change request record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub change_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "reference::deserialize")]
    pub assignment_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_created_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_created_by: Option<String>,
}

/// User record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "reference::deserialize")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
}

/// Reference fields come back either as a plain sys_id string or as
/// `{"link": "...", "value": "<sys_id>"}`; both collapse to the value.
mod reference {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(s)) => Some(s),
            Some(Value::Object(obj)) => obj
                .get("value")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
    }
}
