//! Change request service backed by the `change_request` table

use super::{clamp_limit, ChangeRequestService, ChangeSearch};
use crate::client::{TableApi, TableQuery};
use crate::error::{Result, ServiceNowError};
use crate::types::{tables, ChangeRequest};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct ServiceNowChangeRequests {
    api: Arc<dyn TableApi>,
}

impl ServiceNowChangeRequests {
    pub fn new(api: Arc<dyn TableApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ChangeRequestService for ServiceNowChangeRequests {
    async fn search(&self, search: ChangeSearch) -> Result<Vec<ChangeRequest>> {
        let mut query = TableQuery::new();

        if let Some(filter) = search.query {
            query = query.filter(filter);
        }
        if let Some(state) = search.state {
            query = query.filter(format!("state={}", state));
        }
        let query = query.limit(clamp_limit(search.limit));

        debug!("Searching change requests: {:?}", query.encoded_query());

        self.api
            .query_records(tables::CHANGE_REQUEST, &query)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(ServiceNowError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockTableApi;
    use crate::types::change_state;
    use serde_json::json;

    #[tokio::test]
    async fn test_state_filter_and_limit() {
        let mut api = MockTableApi::new();
        api.expect_query_records()
            .withf(|table, query| {
                table == "change_request"
                    && query.to_params()
                        == vec![
                            ("sysparm_query", "state=-4".to_string()),
                            ("sysparm_limit", "10".to_string()),
                        ]
            })
            .times(1)
            .returning(|_, _| {
                Ok(vec![json!({
                    "number": "CHG0030001",
                    "state": "-4",
                    "type": "normal"
                })])
            });

        let changes = ServiceNowChangeRequests::new(Arc::new(api))
            .search(ChangeSearch {
                state: Some(change_state::ASSESS),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type.as_deref(), Some("normal"));
    }

    #[tokio::test]
    async fn test_upstream_error_propagates() {
        let mut api = MockTableApi::new();
        api.expect_query_records().returning(|_, _| {
            Err(ServiceNowError::UpstreamStatus {
                status: 500,
                message: "boom".to_string(),
            })
        });

        let result = ServiceNowChangeRequests::new(Arc::new(api))
            .search(ChangeSearch::default())
            .await;

        assert!(matches!(
            result,
            Err(ServiceNowError::UpstreamStatus { status: 500, .. })
        ));
    }
}
