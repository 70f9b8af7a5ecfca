//! Gateway contracts
//!
//! The builder talks to three remote capabilities: the catalog of data
//! sources, the query gateway that runs SQL against a data source, and the
//! AI assistant that picks tables and writes SQL. Each is a trait so the
//! orchestrator can run against the HTTP adapter or an in-process fake.

pub mod http;

use crate::error::Result;
use crate::metadata::{ConnectionParams, DataSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpGateway;

/// One result row, keyed by column name in result order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Response of `executeSql`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecuteResponse {
    pub fn ok(columns: Option<Vec<String>>, rows: Vec<Row>) -> Self {
        Self {
            success: true,
            columns,
            rows: Some(rows),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Response of `previewTableRows`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub success: bool,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response of `aiSelectTables`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSelectionResponse {
    #[serde(default)]
    pub selected_table_ids: Vec<i64>,
}

/// Response of `aiGenerateDatasetSQL`. The assistant either answers with a
/// structured object or with free text in `content` that should hold the
/// same object as JSON, possibly inside a code fence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum GenerationResponse {
    Structured {
        sql: String,
        #[serde(default)]
        explanation: Option<String>,
    },
    RawText {
        content: String,
    },
    Unrecognized(serde_json::Value),
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn list_data_sources(&self) -> Result<Vec<DataSource>>;
}

#[async_trait]
pub trait QueryGateway: Send + Sync {
    async fn execute_sql(
        &self,
        connection: &ConnectionParams,
        sql: &str,
        limit: usize,
    ) -> Result<ExecuteResponse>;

    async fn preview_table_rows(
        &self,
        connection: &ConnectionParams,
        table_name: &str,
        limit: usize,
    ) -> Result<PreviewResponse>;
}

#[async_trait]
pub trait AssistantGateway: Send + Sync {
    async fn select_tables(&self, data_source_id: i64, query: &str) -> Result<TableSelectionResponse>;

    async fn generate_dataset_sql(
        &self,
        data_source_id: i64,
        table_ids: &[i64],
        prompt: &str,
        skip_auto_select: bool,
    ) -> Result<GenerationResponse>;
}
