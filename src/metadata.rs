use crate::error::{BuilderError, Result};
use crate::gateway::Catalog;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Connection settings of a data source. Opaque to the builder: the bag is
/// handed to the query gateway untouched.
pub type ConnectionParams = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default = "default_column_type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_column_type() -> String {
    "string".to_string()
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            alias: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: i64,
    pub name: String,
    #[serde(default, alias = "config")]
    pub connection: ConnectionParams,
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl DataSource {
    pub fn table(&self, table_id: i64) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == table_id)
    }

    /// Resolves table ids in the order given, skipping ids the source does not know.
    pub fn tables_by_ids<'a>(&'a self, table_ids: &'a [i64]) -> impl Iterator<Item = &'a Table> + 'a {
        table_ids.iter().filter_map(move |id| self.table(*id))
    }
}

/// Catalog loaded once from a JSON file.
///
/// Accepts either a bare array of data sources or an object with a
/// `dataSources` field.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    data_sources: Vec<DataSource>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Wrapped {
        #[serde(rename = "dataSources")]
        data_sources: Vec<DataSource>,
    },
    Bare(Vec<DataSource>),
}

impl StaticCatalog {
    pub fn new(data_sources: Vec<DataSource>) -> Self {
        Self { data_sources }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BuilderError::Catalog(format!("Failed to read {}: {}", path.display(), e)))?;
        let file: CatalogFile = serde_json::from_str(&content)
            .map_err(|e| BuilderError::Catalog(format!("Failed to parse {}: {}", path.display(), e)))?;

        let data_sources = match file {
            CatalogFile::Wrapped { data_sources } => data_sources,
            CatalogFile::Bare(data_sources) => data_sources,
        };
        Ok(Self { data_sources })
    }

    pub fn data_sources(&self) -> &[DataSource] {
        &self.data_sources
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn list_data_sources(&self) -> Result<Vec<DataSource>> {
        Ok(self.data_sources.clone())
    }
}
