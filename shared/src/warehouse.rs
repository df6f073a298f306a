//! Databricks SQL warehouse client.
//!
//! Statements go through the SQL Statement Execution API with inline
//! JSON_ARRAY results. Rows come back keyed by column name when the result
//! manifest carries a schema, and by `col_N` placeholders otherwise.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::WarehouseConfig;
use crate::normalize::{positional, Row};
use crate::{Error, Result};

/// Executes SQL text and returns ordered rows.
pub trait QueryExecutor {
    fn execute(&self, sql: &str) -> impl Future<Output = Result<Vec<Row>>> + Send;
}

/// Statement submission body.
#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    warehouse_id: &'a str,
    wait_timeout: String,
    on_wait_timeout: &'static str,
    disposition: &'static str,
    format: &'static str,
}

/// Statement execution response (the parts we read).
#[derive(Debug, Deserialize)]
pub struct StatementResponse {
    pub statement_id: Option<String>,
    pub status: Option<StatementStatus>,
    pub manifest: Option<Manifest>,
    pub result: Option<StatementResult>,
}

#[derive(Debug, Deserialize)]
pub struct StatementStatus {
    pub state: String,
    pub error: Option<StatementError>,
}

#[derive(Debug, Deserialize)]
pub struct StatementError {
    pub error_code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub schema: Option<ManifestSchema>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestSchema {
    #[serde(default)]
    pub columns: Vec<ManifestColumn>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestColumn {
    pub name: String,
    pub position: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StatementResult {
    pub data_array: Option<Vec<Vec<Value>>>,
}

/// Turn a statement response into rows, failing on any non-success state.
pub fn rows_from_response(response: StatementResponse) -> Result<Vec<Row>> {
    let status = response
        .status
        .ok_or_else(|| Error::Warehouse("Statement response has no status".to_string()))?;

    if status.state != "SUCCEEDED" {
        let detail = status
            .error
            .and_then(|e| match (e.error_code, e.message) {
                (Some(code), Some(message)) => Some(format!("{}: {}", code, message)),
                (None, Some(message)) => Some(message),
                (Some(code), None) => Some(code),
                (None, None) => None,
            })
            .unwrap_or_else(|| "no error detail".to_string());
        return Err(Error::Warehouse(format!(
            "Statement {} ({})",
            status.state.to_ascii_lowercase(),
            detail
        )));
    }

    let mut columns: Vec<(usize, String)> = response
        .manifest
        .and_then(|m| m.schema)
        .map(|s| {
            s.columns
                .into_iter()
                .enumerate()
                .map(|(i, c)| (c.position.unwrap_or(i), c.name))
                .collect()
        })
        .unwrap_or_default();
    columns.sort_by_key(|(position, _)| *position);
    let names: Vec<String> = columns.into_iter().map(|(_, name)| name).collect();

    let data = response.result.and_then(|r| r.data_array).unwrap_or_default();
    Ok(data
        .into_iter()
        .map(|values| {
            values
                .into_iter()
                .enumerate()
                .map(|(i, value)| {
                    let key = names.get(i).cloned().unwrap_or_else(|| positional(i));
                    (key, value)
                })
                .collect()
        })
        .collect())
}

/// Client for the Databricks SQL Statement Execution API.
pub struct DatabricksClient {
    http: reqwest::Client,
    host: String,
    warehouse_id: String,
    token: String,
    statement_wait: Duration,
}

impl DatabricksClient {
    /// Create a new warehouse client.
    pub fn new(http: reqwest::Client, config: &WarehouseConfig, token: String) -> Self {
        Self {
            http,
            host: config.host.clone(),
            warehouse_id: config.warehouse_id.clone(),
            token,
            statement_wait: config.statement_wait,
        }
    }

    fn statement_request<'a>(&'a self, sql: &'a str) -> StatementRequest<'a> {
        StatementRequest {
            statement: sql,
            warehouse_id: &self.warehouse_id,
            wait_timeout: format!("{}s", self.statement_wait.as_secs()),
            on_wait_timeout: "CANCEL",
            disposition: "INLINE",
            format: "JSON_ARRAY",
        }
    }

    async fn run_statement(&self, sql: &str) -> Result<Vec<Row>> {
        let url = format!("{}/api/2.0/sql/statements", self.host);
        let body = self.statement_request(sql);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Warehouse(format!("{} - {}", status, body)));
        }

        let parsed: StatementResponse = response.json().await?;
        debug!(
            "Statement {} finished",
            parsed.statement_id.as_deref().unwrap_or("unknown")
        );
        rows_from_response(parsed)
    }
}

impl QueryExecutor for DatabricksClient {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        self.run_statement(sql).await
    }
}
