#![allow(dead_code)]

use async_trait::async_trait;
use dataset_builder::dataset::{Dataset, DatasetSink};
use dataset_builder::error::{BuilderError, Result};
use dataset_builder::gateway::{
    AssistantGateway, ExecuteResponse, GenerationResponse, PreviewResponse, QueryGateway, Row,
    TableSelectionResponse,
};
use dataset_builder::metadata::{Column, ConnectionParams, DataSource, StaticCatalog, Table};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const SOURCE_ID: i64 = 7;

pub fn warehouse() -> DataSource {
    let mut connection = ConnectionParams::new();
    connection.insert("type".to_string(), serde_json::json!("postgres"));
    connection.insert("database".to_string(), serde_json::json!("sales"));

    let mut region = Column::new("region", "string");
    region.alias = Some("地区".to_string());

    DataSource {
        id: SOURCE_ID,
        name: "warehouse".to_string(),
        connection,
        tables: vec![
            Table {
                id: 1,
                name: "orders".to_string(),
                description: Some("订单明细".to_string()),
                columns: vec![
                    Column::new("id", "number"),
                    region,
                    Column::new("amount", "number"),
                ],
            },
            Table {
                id: 2,
                name: "customers".to_string(),
                description: None,
                columns: vec![Column::new("id", "number"), Column::new("name", "string")],
            },
        ],
    }
}

pub fn catalog() -> Arc<StaticCatalog> {
    Arc::new(StaticCatalog::new(vec![warehouse()]))
}

pub fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().expect("row must be a JSON object")
}

pub fn structured(sql: &str) -> Result<GenerationResponse> {
    Ok(GenerationResponse::Structured {
        sql: sql.to_string(),
        explanation: Some(format!("explains {}", sql)),
    })
}

pub fn raw(content: &str) -> Result<GenerationResponse> {
    Ok(GenerationResponse::RawText {
        content: content.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateCall {
    pub data_source_id: i64,
    pub table_ids: Vec<i64>,
    pub prompt: String,
    pub skip_auto_select: bool,
}

/// Assistant that replays queued answers and records every call.
#[derive(Default)]
pub struct ScriptedAssistant {
    selections: Mutex<VecDeque<Result<TableSelectionResponse>>>,
    generations: Mutex<VecDeque<Result<GenerationResponse>>>,
    pub select_calls: Mutex<Vec<(i64, String)>>,
    pub generate_calls: Mutex<Vec<GenerateCall>>,
}

impl ScriptedAssistant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selection(self, table_ids: Vec<i64>) -> Self {
        self.selections.lock().unwrap().push_back(Ok(TableSelectionResponse {
            selected_table_ids: table_ids,
        }));
        self
    }

    pub fn with_selection_error(self, message: &str) -> Self {
        self.selections
            .lock()
            .unwrap()
            .push_back(Err(BuilderError::Llm(message.to_string())));
        self
    }

    pub fn with_generation(self, response: Result<GenerationResponse>) -> Self {
        self.generations.lock().unwrap().push_back(response);
        self
    }

    pub fn select_count(&self) -> usize {
        self.select_calls.lock().unwrap().len()
    }

    pub fn generate_calls(&self) -> Vec<GenerateCall> {
        self.generate_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssistantGateway for ScriptedAssistant {
    async fn select_tables(&self, data_source_id: i64, query: &str) -> Result<TableSelectionResponse> {
        self.select_calls
            .lock()
            .unwrap()
            .push((data_source_id, query.to_string()));
        self.selections
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TableSelectionResponse::default()))
    }

    async fn generate_dataset_sql(
        &self,
        data_source_id: i64,
        table_ids: &[i64],
        prompt: &str,
        skip_auto_select: bool,
    ) -> Result<GenerationResponse> {
        self.generate_calls.lock().unwrap().push(GenerateCall {
            data_source_id,
            table_ids: table_ids.to_vec(),
            prompt: prompt.to_string(),
            skip_auto_select,
        });
        self.generations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BuilderError::Llm("no scripted generation left".to_string())))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteCall {
    pub sql: String,
    pub limit: usize,
    pub connection: ConnectionParams,
}

/// Query gateway that replays queued results. Optionally cancels a token
/// while serving the n-th `execute_sql` call, the way a user clicking
/// "cancel" mid-request would.
#[derive(Default)]
pub struct ScriptedQueryGateway {
    executions: Mutex<VecDeque<Result<ExecuteResponse>>>,
    previews: Mutex<VecDeque<Result<PreviewResponse>>>,
    pub execute_calls: Mutex<Vec<ExecuteCall>>,
    pub preview_calls: Mutex<Vec<(String, usize)>>,
    cancel_on_call: Mutex<Option<(usize, CancellationToken)>>,
}

impl ScriptedQueryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution(self, response: Result<ExecuteResponse>) -> Self {
        self.executions.lock().unwrap().push_back(response);
        self
    }

    pub fn with_success(self) -> Self {
        self.with_execution(Ok(ExecuteResponse::ok(
            Some(vec!["n".to_string()]),
            vec![row(serde_json::json!({"n": 1}))],
        )))
    }

    pub fn with_failure(self, message: &str) -> Self {
        self.with_execution(Ok(ExecuteResponse::failed(message)))
    }

    pub fn with_preview(self, response: Result<PreviewResponse>) -> Self {
        self.previews.lock().unwrap().push_back(response);
        self
    }

    pub fn cancel_during_call(self, call: usize, token: CancellationToken) -> Self {
        *self.cancel_on_call.lock().unwrap() = Some((call, token));
        self
    }

    pub fn execute_calls(&self) -> Vec<ExecuteCall> {
        self.execute_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryGateway for ScriptedQueryGateway {
    async fn execute_sql(
        &self,
        connection: &ConnectionParams,
        sql: &str,
        limit: usize,
    ) -> Result<ExecuteResponse> {
        let call_number = {
            let mut calls = self.execute_calls.lock().unwrap();
            calls.push(ExecuteCall {
                sql: sql.to_string(),
                limit,
                connection: connection.clone(),
            });
            calls.len()
        };

        if let Some((call, token)) = self.cancel_on_call.lock().unwrap().as_ref() {
            if *call == call_number {
                token.cancel();
            }
        }

        self.executions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BuilderError::Gateway("no scripted execution left".to_string())))
    }

    async fn preview_table_rows(
        &self,
        _connection: &ConnectionParams,
        table_name: &str,
        limit: usize,
    ) -> Result<PreviewResponse> {
        self.preview_calls
            .lock()
            .unwrap()
            .push((table_name.to_string(), limit));
        self.previews
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BuilderError::Gateway("no scripted preview left".to_string())))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub saved: Mutex<Vec<Dataset>>,
}

impl RecordingSink {
    pub fn saved(&self) -> Vec<Dataset> {
        self.saved.lock().unwrap().clone()
    }
}

impl DatasetSink for RecordingSink {
    fn on_save(&self, dataset: Dataset) {
        self.saved.lock().unwrap().push(dataset);
    }
}
