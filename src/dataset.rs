//! Dataset assembly and preview
//!
//! Turns a validated statement (or a bare table) into a saved `Dataset`.
//! The preview stored on a dataset is a snapshot taken at save time; live
//! refreshes return new data and leave the dataset alone.

use crate::error::{BuilderError, Result};
use crate::gateway::{Catalog, QueryGateway, Row};
use crate::execution_loop::DEFAULT_QUERY;
use crate::metadata::{Column, DataSource, Table};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Wire value of a source reference that points nowhere.
pub const UNKNOWN_SOURCE_ID: i64 = -1;
pub const UNKNOWN_SOURCE_LABEL: &str = "未知数据源";

/// Weak reference from a dataset to its data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum SourceRef {
    Known(i64),
    Unknown,
}

impl From<i64> for SourceRef {
    fn from(id: i64) -> Self {
        if id == UNKNOWN_SOURCE_ID {
            SourceRef::Unknown
        } else {
            SourceRef::Known(id)
        }
    }
}

impl From<SourceRef> for i64 {
    fn from(source: SourceRef) -> Self {
        match source {
            SourceRef::Known(id) => id,
            SourceRef::Unknown => UNKNOWN_SOURCE_ID,
        }
    }
}

impl From<Option<i64>> for SourceRef {
    fn from(id: Option<i64>) -> Self {
        id.map(SourceRef::from).unwrap_or(SourceRef::Unknown)
    }
}

impl SourceRef {
    pub fn id(self) -> Option<i64> {
        match self {
            SourceRef::Known(id) => Some(id),
            SourceRef::Unknown => None,
        }
    }
}

/// Columns plus captured rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

impl TableData {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub data_source_id: SourceRef,
    pub sql: String,
    pub preview: TableData,
    pub created_at: DateTime<Utc>,
}

/// Receives saved datasets. Fire-and-forget: the builder does not wait for
/// persistence to be confirmed.
pub trait DatasetSink: Send + Sync {
    fn on_save(&self, dataset: Dataset);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveRequest {
    pub name: String,
    pub description: Option<String>,
    pub preview: Option<TableData>,
    pub sql: String,
    /// `None` when no data source was resolved in this editing pass.
    pub data_source_id: Option<i64>,
}

/// Builds column metadata for a result set.
///
/// Declared column names win; without them, keys are collected from the rows
/// in first-seen order. A column is typed "number" when the first row holds
/// a number for it, "string" otherwise.
pub fn infer_columns(declared: Option<&[String]>, rows: &[Row]) -> Vec<Column> {
    let names: Vec<String> = match declared {
        Some(names) if !names.is_empty() => names.to_vec(),
        _ => {
            let mut names: Vec<String> = Vec::new();
            for row in rows {
                for key in row.keys() {
                    if !names.iter().any(|n| n == key) {
                        names.push(key.clone());
                    }
                }
            }
            names
        }
    };

    let first = rows.first();
    names
        .into_iter()
        .map(|name| {
            let is_number = first
                .and_then(|row| row.get(&name))
                .map(|v| v.is_number())
                .unwrap_or(false);
            Column::new(name, if is_number { "number" } else { "string" })
        })
        .collect()
}

/// Synthesized statement for dumping a whole table. The name is used as-is.
pub fn select_all_sql(table_name: &str) -> String {
    format!("SELECT * FROM {}", table_name)
}

pub fn source_label(dataset: &Dataset, sources: &[DataSource]) -> String {
    dataset
        .data_source_id
        .id()
        .and_then(|id| sources.iter().find(|s| s.id == id))
        .map(|s| s.name.clone())
        .unwrap_or_else(|| UNKNOWN_SOURCE_LABEL.to_string())
}

/// Name for a dataset saved without an explicit one: the request text, or
/// the selected table names when the request was blank.
pub fn default_dataset_name(query: &str, tables: &[&Table]) -> String {
    let query = query.trim();
    if !query.is_empty() {
        return query.to_string();
    }
    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    if names.is_empty() {
        DEFAULT_QUERY.to_string()
    } else {
        names.join("_")
    }
}

pub struct DatasetBuilder {
    catalog: Arc<dyn Catalog>,
    query_gateway: Arc<dyn QueryGateway>,
    sink: Arc<dyn DatasetSink>,
    last_created: Mutex<Option<DateTime<Utc>>>,
}

impl DatasetBuilder {
    pub fn new(catalog: Arc<dyn Catalog>, query_gateway: Arc<dyn QueryGateway>, sink: Arc<dyn DatasetSink>) -> Self {
        Self {
            catalog,
            query_gateway,
            sink,
            last_created: Mutex::new(None),
        }
    }

    /// Executes `sql` and returns a snapshot of the result. No retries.
    pub async fn execute_and_preview(&self, sql: &str, data_source_id: i64, row_limit: usize) -> Result<TableData> {
        let source = self.data_source(data_source_id).await?;
        info!("Executing preview on {} (limit {})", source.name, row_limit);

        let response = self
            .query_gateway
            .execute_sql(&source.connection, sql, row_limit)
            .await?;
        if !response.success {
            return Err(BuilderError::Execution(
                response
                    .message
                    .unwrap_or_else(|| "查询执行失败".to_string()),
            ));
        }

        let rows = response.rows.unwrap_or_default();
        let columns = infer_columns(response.columns.as_deref(), &rows);
        Ok(TableData { columns, rows })
    }

    /// Re-runs a saved dataset's SQL. The dataset's own snapshot is untouched.
    pub async fn refresh_preview(&self, dataset: &Dataset, row_limit: usize) -> Result<TableData> {
        let data_source_id = dataset
            .data_source_id
            .id()
            .ok_or_else(|| BuilderError::Catalog(UNKNOWN_SOURCE_LABEL.to_string()))?;
        self.execute_and_preview(&dataset.sql, data_source_id, row_limit).await
    }

    /// Sample rows of a catalog table, typed with the catalog's columns.
    pub async fn sample_table(&self, data_source_id: i64, table_id: i64, limit: usize) -> Result<TableData> {
        let source = self.data_source(data_source_id).await?;
        let table = source
            .table(table_id)
            .ok_or_else(|| BuilderError::Catalog(format!("表 {} 不存在", table_id)))?;

        let response = self
            .query_gateway
            .preview_table_rows(&source.connection, &table.name, limit)
            .await?;
        if !response.success {
            return Err(BuilderError::Execution(
                response
                    .message
                    .unwrap_or_else(|| format!("无法读取表 {} 的数据", table.name)),
            ));
        }

        let columns = if table.columns.is_empty() {
            infer_columns(None, &response.rows)
        } else {
            table.columns.clone()
        };
        Ok(TableData {
            columns,
            rows: response.rows,
        })
    }

    /// One dataset per table, `SELECT * FROM <name>` with the table's columns
    /// and no rows. Makes no AI or execution call.
    pub async fn direct_create_from_tables(&self, table_ids: &[i64], data_source_id: i64) -> Result<Vec<Dataset>> {
        if table_ids.is_empty() {
            return Err(BuilderError::Validation("请至少选择一张表".to_string()));
        }
        let source = self.data_source(data_source_id).await?;

        let mut datasets = Vec::new();
        for table_id in table_ids {
            let Some(table) = source.table(*table_id) else {
                warn!("Table {} not found in data source {}", table_id, source.name);
                continue;
            };
            let dataset = Dataset {
                id: Uuid::new_v4().to_string(),
                name: table.name.clone(),
                description: table.description.clone(),
                data_source_id: SourceRef::Known(source.id),
                sql: select_all_sql(&table.name),
                preview: TableData {
                    columns: table.columns.clone(),
                    rows: Vec::new(),
                },
                created_at: self.next_timestamp(),
            };
            self.sink.on_save(dataset.clone());
            datasets.push(dataset);
        }

        if datasets.is_empty() {
            return Err(BuilderError::Catalog(format!(
                "数据源 {} 中找不到所选的表",
                source.name
            )));
        }
        info!("Created {} dataset(s) directly from tables", datasets.len());
        Ok(datasets)
    }

    /// Validates and saves a dataset, overwriting `editing` when given.
    pub fn finalize_save(&self, request: SaveRequest, editing: Option<&Dataset>) -> Result<Dataset> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(BuilderError::Validation("请输入数据集名称".to_string()));
        }
        let preview = request
            .preview
            .ok_or_else(|| BuilderError::Validation("请先执行查询并预览数据".to_string()))?;

        let description = request
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let dataset = match editing {
            Some(original) => Dataset {
                id: original.id.clone(),
                name: name.to_string(),
                description,
                data_source_id: match request.data_source_id {
                    Some(id) => SourceRef::from(id),
                    None => original.data_source_id,
                },
                sql: request.sql,
                preview,
                created_at: original.created_at,
            },
            None => Dataset {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                description,
                data_source_id: SourceRef::from(request.data_source_id),
                sql: request.sql,
                preview,
                created_at: self.next_timestamp(),
            },
        };

        info!("Saving dataset {} ({})", dataset.name, dataset.id);
        self.sink.on_save(dataset.clone());
        Ok(dataset)
    }

    async fn data_source(&self, data_source_id: i64) -> Result<DataSource> {
        self.catalog
            .list_data_sources()
            .await?
            .into_iter()
            .find(|s| s.id == data_source_id)
            .ok_or_else(|| BuilderError::Catalog(format!("数据源 {} 不存在", data_source_id)))
    }

    /// Creation timestamps are strictly increasing per builder.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut last = match self.last_created.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let stamp = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}
