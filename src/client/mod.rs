//! ServiceNow REST client
//!
//! Talks to the table API (`/api/now/table/{table}`) and the attachment API
//! with Basic authentication. Every request goes through the client's
//! [`ResiliencePolicy`](resilience::ResiliencePolicy).

pub mod query;
pub mod resilience;

pub use query::TableQuery;
pub use resilience::{CircuitBreaker, CircuitStatus, ResiliencePolicy, RetryPolicy};

use crate::config::ServiceNowConfig;
use crate::error::{Result, ServiceNowError};
use crate::types::{ErrorResponse, ListResponse, RecordResponse};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Record-level operations against named tables.
///
/// Domain services depend on this trait rather than on the HTTP client so
/// they can be exercised without a ServiceNow instance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TableApi: Send + Sync {
    /// Fetch one record by sys_id
    async fn get_record(&self, table: &str, sys_id: &str) -> Result<Value>;

    /// List records matching `query`
    async fn query_records(&self, table: &str, query: &TableQuery) -> Result<Vec<Value>>;

    /// Insert a record and return it as stored
    async fn create_record(&self, table: &str, fields: &Value) -> Result<Value>;

    /// Patch a record and return it as stored
    async fn update_record(&self, table: &str, sys_id: &str, fields: &Value) -> Result<Value>;

    /// Delete a record
    async fn delete_record(&self, table: &str, sys_id: &str) -> Result<()>;
}

/// Request payload
enum Body<'a> {
    Empty,
    Json(&'a Value),
    Bytes {
        content_type: &'a str,
        data: &'a [u8],
    },
}

/// HTTP client for one ServiceNow instance
pub struct ServiceNowClient {
    http: Client,
    instance_url: String,
    username: String,
    password: SecretString,
    resilience: ResiliencePolicy,
    retry_unsafe_methods: bool,
}

impl ServiceNowClient {
    /// Create a client from configuration
    pub fn new(config: &ServiceNowConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            instance_url: config.instance_url.clone(),
            username: config.username.clone(),
            password: SecretString::new(config.password.expose_secret().into()),
            resilience: ResiliencePolicy::from_settings(&config.retry, &config.breaker),
            retry_unsafe_methods: config.retry.retry_unsafe_methods,
        })
    }

    /// Replace the resilience policy (tests use short delays)
    pub fn with_resilience(mut self, resilience: ResiliencePolicy) -> Self {
        self.resilience = resilience;
        self
    }

    /// Instance base URL
    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    /// Circuit breaker state, for health reporting
    pub fn circuit_status(&self) -> CircuitStatus {
        self.resilience.breaker().status()
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/api/now/table/{}", self.instance_url, table)
    }

    fn record_url(&self, table: &str, sys_id: &str) -> String {
        format!("{}/api/now/table/{}/{}", self.instance_url, table, sys_id)
    }

    /// Upload a file and attach it to a record
    pub async fn upload_attachment(
        &self,
        table: &str,
        sys_id: &str,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<Value> {
        let url = format!("{}/api/now/attachment/file", self.instance_url);
        let params = [
            ("table_name", table.to_string()),
            ("table_sys_id", sys_id.to_string()),
            ("file_name", file_name.to_string()),
        ];

        let bytes = self
            .send(
                Method::POST,
                &url,
                &params,
                Body::Bytes { content_type, data },
                "application/json",
            )
            .await?;

        let response: RecordResponse<Value> = decode(&bytes)?;
        Ok(response.result)
    }

    /// Download an attachment's content
    pub async fn download_attachment(&self, attachment_sys_id: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/api/now/attachment/{}/file",
            self.instance_url, attachment_sys_id
        );
        self.send(Method::GET, &url, &[], Body::Empty, "*/*").await
    }

    /// Send one logical request under the resilience policy, returning the body
    async fn send(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, String)],
        body: Body<'_>,
        accept: &str,
    ) -> Result<Vec<u8>> {
        let retryable = method != Method::POST || self.retry_unsafe_methods;
        debug!("{} {}", method, url);

        self.resilience
            .execute(retryable, || {
                self.send_once(method.clone(), url, params, &body, accept)
            })
            .await
    }

    /// Single HTTP attempt; classifies the status into the error taxonomy
    async fn send_once(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, String)],
        body: &Body<'_>,
        accept: &str,
    ) -> Result<Vec<u8>> {
        let mut request = self
            .http
            .request(method, url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .header(ACCEPT, accept);

        if !params.is_empty() {
            request = request.query(params);
        }

        request = match body {
            Body::Empty => request,
            Body::Json(value) => request.json(value),
            Body::Bytes { content_type, data } => request
                .header(CONTENT_TYPE, *content_type)
                .body(data.to_vec()),
        };

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.bytes().await?.to_vec());
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .ok()
            .and_then(|e| e.describe())
            .unwrap_or_else(|| {
                if text.is_empty() {
                    status.canonical_reason().unwrap_or("Unknown error").to_string()
                } else {
                    text.clone()
                }
            });

        if status == StatusCode::NOT_FOUND {
            return Err(ServiceNowError::NotFound(format!("{} ({})", url, message)));
        }

        Err(ServiceNowError::UpstreamStatus {
            status: status.as_u16(),
            message,
        })
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[async_trait]
impl TableApi for ServiceNowClient {
    async fn get_record(&self, table: &str, sys_id: &str) -> Result<Value> {
        let url = self.record_url(table, sys_id);
        let bytes = self
            .send(Method::GET, &url, &[], Body::Empty, "application/json")
            .await?;
        let response: RecordResponse<Value> = decode(&bytes)?;
        Ok(response.result)
    }

    async fn query_records(&self, table: &str, query: &TableQuery) -> Result<Vec<Value>> {
        let url = self.table_url(table);
        let params = query.to_params();
        let bytes = self
            .send(Method::GET, &url, &params, Body::Empty, "application/json")
            .await?;
        let response: ListResponse<Value> = decode(&bytes)?;
        debug!("{} returned {} records", table, response.result.len());
        Ok(response.result)
    }

    async fn create_record(&self, table: &str, fields: &Value) -> Result<Value> {
        let url = self.table_url(table);
        let bytes = self
            .send(Method::POST, &url, &[], Body::Json(fields), "application/json")
            .await?;
        let response: RecordResponse<Value> = decode(&bytes)?;
        Ok(response.result)
    }

    async fn update_record(&self, table: &str, sys_id: &str, fields: &Value) -> Result<Value> {
        let url = self.record_url(table, sys_id);
        let bytes = self
            .send(Method::PATCH, &url, &[], Body::Json(fields), "application/json")
            .await?;
        let response: RecordResponse<Value> = decode(&bytes)?;
        Ok(response.result)
    }

    async fn delete_record(&self, table: &str, sys_id: &str) -> Result<()> {
        let url = self.record_url(table, sys_id);
        self.send(Method::DELETE, &url, &[], Body::Empty, "application/json")
            .await?;
        Ok(())
    }
}
