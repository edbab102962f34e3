//! Incident service backed by the `incident` table

use super::{clamp_limit, IncidentSearch, IncidentService, IncidentUpdate, NewIncident};
use crate::client::query::escape_value;
use crate::client::{TableApi, TableQuery};
use crate::error::{Result, ServiceNowError};
use crate::types::{impact, incident_state, tables, Incident};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Length of a ServiceNow sys_id
const SYS_ID_LEN: usize = 32;

/// Whether `identifier` should be fetched directly as a sys_id.
///
/// Anything that is not exactly 32 characters, or that starts with `INC`, is
/// treated as an incident number.
pub fn is_sys_id(identifier: &str) -> bool {
    identifier.chars().count() == SYS_ID_LEN && !identifier.starts_with("INC")
}

/// Incident operations over the table API
pub struct ServiceNowIncidents {
    api: Arc<dyn TableApi>,
}

impl ServiceNowIncidents {
    pub fn new(api: Arc<dyn TableApi>) -> Self {
        Self { api }
    }
}

fn check_scale(field: &str, value: Option<i32>) -> Result<i32> {
    let value = value.unwrap_or(impact::MEDIUM);
    if (impact::HIGH..=impact::LOW).contains(&value) {
        Ok(value)
    } else {
        Err(ServiceNowError::InvalidArgument(format!(
            "{} must be 1, 2 or 3, got {}",
            field, value
        )))
    }
}

fn insert_opt(fields: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        fields.insert(key.to_string(), Value::String(value));
    }
}

#[async_trait]
impl IncidentService for ServiceNowIncidents {
    async fn create(&self, incident: NewIncident) -> Result<Incident> {
        if incident.short_description.is_empty() {
            return Err(ServiceNowError::InvalidArgument(
                "short_description cannot be empty".to_string(),
            ));
        }

        let urgency = check_scale("urgency", incident.urgency)?;
        let impact = check_scale("impact", incident.impact)?;

        info!("Creating new incident");

        let mut fields = Map::new();
        fields.insert(
            "short_description".to_string(),
            Value::String(incident.short_description),
        );
        fields.insert("urgency".to_string(), Value::String(urgency.to_string()));
        fields.insert("impact".to_string(), Value::String(impact.to_string()));
        fields.insert(
            "state".to_string(),
            Value::String(incident_state::NEW.to_string()),
        );
        insert_opt(&mut fields, "description", incident.description);
        insert_opt(&mut fields, "caller_id", incident.caller_id);
        insert_opt(&mut fields, "assignment_group", incident.assignment_group);
        insert_opt(&mut fields, "category", incident.category);
        insert_opt(&mut fields, "subcategory", incident.subcategory);

        let record = self
            .api
            .create_record(tables::INCIDENT, &Value::Object(fields))
            .await?;
        let created: Incident = serde_json::from_value(record)?;

        info!(
            "Created incident: {}",
            created.number.as_deref().unwrap_or("<unknown>")
        );
        Ok(created)
    }

    async fn update(&self, update: IncidentUpdate) -> Result<Incident> {
        let sys_id = update.sys_id.trim().to_string();
        if sys_id.is_empty() {
            return Err(ServiceNowError::InvalidArgument(
                "sys_id cannot be empty".to_string(),
            ));
        }

        let mut fields = Map::new();
        if let Some(state) = update.state {
            fields.insert("state".to_string(), Value::String(state.to_string()));
        }
        insert_opt(&mut fields, "work_notes", update.work_notes);
        insert_opt(&mut fields, "comments", update.comments);
        insert_opt(&mut fields, "close_code", update.close_code);
        insert_opt(&mut fields, "close_notes", update.close_notes);
        insert_opt(&mut fields, "assigned_to", update.assigned_to);

        info!("Updating incident: {}", sys_id);

        let record = self
            .api
            .update_record(tables::INCIDENT, &sys_id, &Value::Object(fields))
            .await?;
        let updated: Incident = serde_json::from_value(record)?;

        info!(
            "Updated incident: {}",
            updated.number.as_deref().unwrap_or(&sys_id)
        );
        Ok(updated)
    }

    async fn get(&self, identifier: &str) -> Result<Incident> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(ServiceNowError::InvalidArgument(
                "identifier cannot be empty".to_string(),
            ));
        }

        info!("Getting incident: {}", identifier);

        if is_sys_id(identifier) {
            let record = self
                .api
                .get_record(tables::INCIDENT, identifier)
                .await
                .map_err(|e| match e {
                    ServiceNowError::NotFound(_) => {
                        ServiceNowError::NotFound(format!("Incident {}", identifier))
                    }
                    other => other,
                })?;
            return Ok(serde_json::from_value(record)?);
        }

        let query = TableQuery::new()
            .filter(format!("number={}", escape_value(identifier)))
            .limit(1);

        let record = self
            .api
            .query_records(tables::INCIDENT, &query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceNowError::NotFound(format!("Incident {}", identifier)))?;

        Ok(serde_json::from_value(record)?)
    }

    async fn search(&self, search: IncidentSearch) -> Result<Vec<Incident>> {
        let mut query = TableQuery::new()
            .limit(clamp_limit(search.limit))
            .offset(search.offset.unwrap_or(0));

        if let Some(filter) = search.query {
            query = query.filter(filter);
        }

        if let Some(field) = search.order_by {
            query = if search.order_desc {
                query.order_by_desc(field)
            } else {
                query.order_by(field)
            };
        }

        debug!("Searching incidents: {:?}", query.encoded_query());

        let records = self.api.query_records(tables::INCIDENT, &query).await?;
        records
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(ServiceNowError::from))
            .collect()
    }
}
