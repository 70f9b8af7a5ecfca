//! HTTP adapter for the gateway contracts
//!
//! A single JSON-over-HTTP backend serves the catalog, query execution and
//! AI assistant routes. No timeout is configured on the client: a hung
//! call stalls the attempt that issued it.

use crate::error::{BuilderError, Result};
use crate::gateway::{
    AssistantGateway, Catalog, ExecuteResponse, GenerationResponse, PreviewResponse, QueryGateway,
    TableSelectionResponse,
};
use crate::metadata::{ConnectionParams, DataSource};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    connection: &'a ConnectionParams,
    sql: &'a str,
    limit: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PreviewRequest<'a> {
    connection: &'a ConnectionParams,
    table_name: &'a str,
    limit: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SelectTablesRequest<'a> {
    data_source_id: i64,
    query: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateSqlRequest<'a> {
    data_source_id: i64,
    table_ids: &'a [i64],
    prompt: &'a str,
    skip_auto_select: bool,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let request = self.authorize(self.client.get(&url));
        Self::read_json(request, path).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);
        let request = self.authorize(self.client.post(&url).json(body));
        Self::read_json(request, path).await
    }

    async fn read_json<T: DeserializeOwned>(request: RequestBuilder, path: &str) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BuilderError::Gateway(format!(
                "{} returned {}: {}",
                path,
                status,
                body.trim()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BuilderError::Gateway(format!("Failed to parse response from {}: {}", path, e)))
    }
}

#[async_trait]
impl Catalog for HttpGateway {
    async fn list_data_sources(&self) -> Result<Vec<DataSource>> {
        self.get_json("/api/datasources").await
    }
}

#[async_trait]
impl QueryGateway for HttpGateway {
    async fn execute_sql(
        &self,
        connection: &ConnectionParams,
        sql: &str,
        limit: usize,
    ) -> Result<ExecuteResponse> {
        let body = ExecuteRequest { connection, sql, limit };
        self.post_json("/api/query/execute", &body).await
    }

    async fn preview_table_rows(
        &self,
        connection: &ConnectionParams,
        table_name: &str,
        limit: usize,
    ) -> Result<PreviewResponse> {
        let body = PreviewRequest {
            connection,
            table_name,
            limit,
        };
        self.post_json("/api/query/preview", &body).await
    }
}

#[async_trait]
impl AssistantGateway for HttpGateway {
    async fn select_tables(&self, data_source_id: i64, query: &str) -> Result<TableSelectionResponse> {
        let body = SelectTablesRequest { data_source_id, query };
        self.post_json("/api/ai/select-tables", &body)
            .await
            .map_err(|e| BuilderError::Llm(e.to_string()))
    }

    async fn generate_dataset_sql(
        &self,
        data_source_id: i64,
        table_ids: &[i64],
        prompt: &str,
        skip_auto_select: bool,
    ) -> Result<GenerationResponse> {
        let body = GenerateSqlRequest {
            data_source_id,
            table_ids,
            prompt,
            skip_auto_select,
        };
        self.post_json("/api/ai/generate-dataset-sql", &body)
            .await
            .map_err(|e| BuilderError::Llm(e.to_string()))
    }
}
