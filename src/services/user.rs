//! User lookup backed by the `sys_user` table

use super::{clamp_limit, UserSearch, UserService};
use crate::client::query::escape_value;
use crate::client::{TableApi, TableQuery};
use crate::error::{Result, ServiceNowError};
use crate::types::{tables, User};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Columns matched by a free-text user search
const SEARCH_COLUMNS: [&str; 4] = ["user_name", "first_name", "last_name", "email"];

pub struct ServiceNowUsers {
    api: Arc<dyn TableApi>,
}

impl ServiceNowUsers {
    pub fn new(api: Arc<dyn TableApi>) -> Self {
        Self { api }
    }
}

/// `user_nameLIKEx^ORfirst_nameLIKEx^OR...`
fn name_clause(term: &str) -> String {
    SEARCH_COLUMNS
        .iter()
        .map(|column| format!("{}LIKE{}", column, term))
        .collect::<Vec<_>>()
        .join("^OR")
}

#[async_trait]
impl UserService for ServiceNowUsers {
    async fn search(&self, search: UserSearch) -> Result<Vec<User>> {
        let term = search.query.trim();
        if term.is_empty() {
            return Err(ServiceNowError::InvalidArgument(
                "query cannot be empty".to_string(),
            ));
        }

        info!("Searching users: {}", term);

        let mut query = TableQuery::new().filter(name_clause(&escape_value(term)));
        if let Some(department) = search.department.as_deref().map(str::trim) {
            if !department.is_empty() {
                query = query.filter(format!("department.nameLIKE{}", escape_value(department)));
            }
        }
        if let Some(active) = search.active {
            query = query.filter(format!("active={}", active));
        }
        let query = query.limit(clamp_limit(search.limit));

        let records = self.api.query_records(tables::USER, &query).await?;
        debug!("Found {} users", records.len());

        records
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(ServiceNowError::from))
            .collect()
    }
}
