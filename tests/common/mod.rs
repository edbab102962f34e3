//! Common test utilities and helpers
//!
//! `MockServiceNow` is an in-process axum app standing in for a ServiceNow
//! instance. It records every request, can be told to fail the next N
//! requests with a given status, and can hold the next reply back.
#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::{json, Value};
use servicenow_mcp_core::client::{CircuitBreaker, ResiliencePolicy, RetryPolicy};
use servicenow_mcp_core::{build_server, McpServer, ServiceNowClient, ServiceNowConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const INCIDENT_SYS_ID: &str = "9d385017c611228701d22104cc95c371";
pub const INCIDENT_NUMBER: &str = "INC0010001";
pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "s3cret";

/// One request as seen by the mock
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    requests: Mutex<Vec<RecordedRequest>>,
    failures: Mutex<VecDeque<StatusCode>>,
    delay: Mutex<Option<Duration>>,
    attachment: Mutex<Option<Vec<u8>>>,
}

/// Running mock instance
pub struct MockServiceNow {
    pub base_url: String,
    state: Arc<MockState>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockServiceNow {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock ServiceNow");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            handle,
        }
    }

    /// Fail the next `count` requests with `status`
    pub fn fail_next(&self, count: usize, status: StatusCode) {
        let mut failures = self.state.failures.lock().unwrap();
        failures.extend(std::iter::repeat(status).take(count));
    }

    /// Hold the reply to the next request for `delay`
    pub fn delay_next(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn config(&self) -> ServiceNowConfig {
        ServiceNowConfig::new(&self.base_url, USERNAME, PASSWORD).unwrap()
    }

    /// Client with millisecond backoff so retries don't slow the suite
    pub fn client(&self) -> ServiceNowClient {
        self.client_with(fast_resilience())
    }

    pub fn client_with(&self, resilience: ResiliencePolicy) -> ServiceNowClient {
        ServiceNowClient::new(&self.config())
            .unwrap()
            .with_resilience(resilience)
    }

    /// Full MCP server over the mock
    pub fn mcp_server(&self) -> McpServer {
        build_server(Arc::new(self.client())).unwrap()
    }
}

impl Drop for MockServiceNow {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn fast_resilience() -> ResiliencePolicy {
    ResiliencePolicy::new(
        RetryPolicy::new(3, Duration::from_millis(5)),
        CircuitBreaker::new(5, Duration::from_secs(30)),
    )
}

pub fn incident_record(sys_id: &str, number: &str) -> Value {
    json!({
        "sys_id": sys_id,
        "number": number,
        "short_description": "Email server down",
        "state": "2",
        "urgency": "1",
        "impact": "2",
        "priority": "2",
        "sys_created_on": "2024-05-01 10:00:00",
        "assignment_group": {
            "link": "https://example.service-now.com/api/now/table/sys_user_group/g1",
            "value": "g1"
        }
    })
}

fn failure(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {"message": message, "detail": "injected by mock"},
            "status": "failure"
        })),
    )
        .into_response()
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: uri.path().to_string(),
        query: query.clone(),
        authorization: header_value(header::AUTHORIZATION),
        content_type: header_value(header::CONTENT_TYPE),
        body: body.to_vec(),
    });

    let delay = state.delay.lock().unwrap().take();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    if let Some(status) = state.failures.lock().unwrap().pop_front() {
        return failure(status, "Injected failure");
    }

    let segments: Vec<&str> = uri
        .path()
        .trim_start_matches("/api/now/")
        .split('/')
        .collect();

    match (method, segments.as_slice()) {
        (Method::GET, ["table", "incident", sys_id]) => {
            if *sys_id == INCIDENT_SYS_ID {
                Json(json!({ "result": incident_record(INCIDENT_SYS_ID, INCIDENT_NUMBER) }))
                    .into_response()
            } else {
                failure(StatusCode::NOT_FOUND, "No Record found")
            }
        }
        (Method::GET, ["table", "incident"]) => {
            let filter = query.get("sysparm_query").cloned().unwrap_or_default();
            let limit: usize = query
                .get("sysparm_limit")
                .and_then(|l| l.parse().ok())
                .unwrap_or(10);

            let records: Vec<Value> = if let Some(number) = filter.strip_prefix("number=") {
                if number == INCIDENT_NUMBER {
                    vec![incident_record(INCIDENT_SYS_ID, INCIDENT_NUMBER)]
                } else {
                    vec![]
                }
            } else {
                (0..25)
                    .map(|i| incident_record(&format!("sys{:029}", i), &format!("INC{:07}", 20000 + i)))
                    .take(limit)
                    .collect()
            };
            Json(json!({ "result": records })).into_response()
        }
        (Method::POST, ["table", "incident"]) => {
            let mut record: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));
            record["sys_id"] = json!("a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6");
            record["number"] = json!("INC0010100");
            (StatusCode::CREATED, Json(json!({ "result": record }))).into_response()
        }
        (Method::PATCH, ["table", "incident", sys_id]) => {
            let mut record = incident_record(sys_id, INCIDENT_NUMBER);
            if let (Some(target), Ok(Value::Object(patch))) =
                (record.as_object_mut(), serde_json::from_slice::<Value>(&body))
            {
                target.extend(patch);
            }
            Json(json!({ "result": record })).into_response()
        }
        (Method::DELETE, ["table", _, _]) => StatusCode::NO_CONTENT.into_response(),
        (Method::GET, ["table", "change_request"]) => Json(json!({
            "result": [{
                "sys_id": "c1",
                "number": "CHG0030001",
                "short_description": "Upgrade core switch",
                "state": "-4",
                "type": "normal"
            }]
        }))
        .into_response(),
        (Method::GET, ["table", "sys_user"]) => Json(json!({
            "result": [{
                "sys_id": "u1",
                "user_name": "beth.anglin",
                "first_name": "Beth",
                "last_name": "Anglin",
                "email": "beth.anglin@example.com",
                "active": "true"
            }]
        }))
        .into_response(),
        (Method::POST, ["attachment", "file"]) => {
            let size = body.len();
            *state.attachment.lock().unwrap() = Some(body.to_vec());
            (
                StatusCode::CREATED,
                Json(json!({
                    "result": {
                        "sys_id": "att1",
                        "file_name": query.get("file_name"),
                        "table_name": query.get("table_name"),
                        "table_sys_id": query.get("table_sys_id"),
                        "size_bytes": size.to_string()
                    }
                })),
            )
                .into_response()
        }
        (Method::GET, ["attachment", _, "file"]) => match state.attachment.lock().unwrap().clone() {
            Some(bytes) => (
                [(header::CONTENT_TYPE, "application/octet-stream")],
                bytes,
            )
                .into_response(),
            None => failure(StatusCode::NOT_FOUND, "Attachment not found"),
        },
        _ => failure(StatusCode::BAD_REQUEST, "Unsupported request"),
    }
}
