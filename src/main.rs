use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dataset_builder::config::BuilderConfig;
use dataset_builder::dataset::{
    default_dataset_name, source_label, Dataset, DatasetBuilder, DatasetSink, SaveRequest, TableData,
};
use dataset_builder::execution_loop::{
    GenerationRequest, SessionSnapshot, SessionState, SqlGenerationOrchestrator, StepStatus,
};
use dataset_builder::gateway::{Catalog, HttpGateway};
use dataset_builder::metadata::StaticCatalog;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dataset-builder")]
#[command(about = "Build BI datasets from natural language with AI-generated, execution-checked SQL")]
struct Args {
    /// Base URL of the BI backend (or set DATASET_BUILDER_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Bearer token for the backend (or set DATASET_BUILDER_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Read data sources from a JSON file instead of the backend
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List data sources and their tables
    Sources,
    /// Show sample rows of a table
    Sample {
        #[arg(short, long)]
        data_source: i64,

        #[arg(short, long)]
        table: i64,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate SQL from a natural-language request and save it as a dataset
    Generate {
        /// What the dataset should contain; blank means all rows of the tables
        #[arg(default_value = "")]
        query: String,

        #[arg(short, long)]
        data_source: i64,

        /// Table ids to use (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        tables: Vec<i64>,

        /// Use exactly the given tables and skip AI table selection
        #[arg(long)]
        locked: bool,

        /// Dataset name (defaults to the request text, or the table names when it is blank)
        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Append saved datasets as JSON lines to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        max_attempts: Option<u8>,
    },
    /// Create one `SELECT *` dataset per table without AI or execution
    Direct {
        #[arg(short, long)]
        data_source: i64,

        #[arg(short, long, value_delimiter = ',', required = true)]
        tables: Vec<i64>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Writes saved datasets as JSON lines. Write errors are logged, not returned.
struct JsonLinesSink {
    output: Option<PathBuf>,
}

impl DatasetSink for JsonLinesSink {
    fn on_save(&self, dataset: Dataset) {
        let line = match serde_json::to_string(&dataset) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize dataset {}: {}", dataset.id, e);
                return;
            }
        };

        match &self.output {
            None => println!("{}", line),
            Some(path) => {
                let written = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .and_then(|mut file| writeln!(file, "{}", line));
                if let Err(e) = written {
                    error!("Failed to write dataset to {}: {}", path.display(), e);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = BuilderConfig::from_env().context("invalid configuration")?;
    if let Some(url) = args.api_url {
        config.api_url = url;
    }
    if args.api_key.is_some() {
        config.api_key = args.api_key;
    }
    if args.catalog.is_some() {
        config.catalog_path = args.catalog;
    }

    let gateway = Arc::new(HttpGateway::new(config.api_url.clone(), config.api_key.clone()));
    let catalog: Arc<dyn Catalog> = match &config.catalog_path {
        Some(path) => Arc::new(StaticCatalog::load(path)?),
        None => gateway.clone(),
    };
    info!("Using backend at {}", gateway.base_url());

    match args.command {
        Commands::Sources => list_sources(catalog).await,
        Commands::Sample { data_source, table, limit } => {
            let builder = DatasetBuilder::new(catalog, gateway, Arc::new(JsonLinesSink { output: None }));
            let data = builder.sample_table(data_source, table, limit).await?;
            print_table(&data);
            Ok(())
        }
        Commands::Generate {
            query,
            data_source,
            tables,
            locked,
            name,
            description,
            output,
            max_attempts,
        } => {
            if let Some(max_attempts) = max_attempts {
                config.generation = config.generation.with_max_attempts(max_attempts);
            }
            let orchestrator = SqlGenerationOrchestrator::new(
                catalog.clone(),
                gateway.clone(),
                gateway.clone(),
                config.generation.clone(),
            );
            let builder = DatasetBuilder::new(catalog.clone(), gateway, Arc::new(JsonLinesSink { output }));

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });
            let progress = tokio::spawn(print_progress(orchestrator.subscribe()));

            let request = GenerationRequest::new(data_source, query.clone(), tables, locked);
            let session = orchestrator.start_generation(request, &cancel).await;
            drop(orchestrator);
            let _ = progress.await;

            let sql = match (session.state(), session.sql()) {
                (SessionState::Done, Some(sql)) => sql.to_string(),
                (state, _) => bail!(
                    "generation ended in {:?}: {}",
                    state,
                    session.message().unwrap_or("no message")
                ),
            };
            eprintln!("\nSQL:\n{}", sql);
            if let Some(explanation) = session.explanation() {
                eprintln!("\n{}", explanation);
            }

            let preview = builder
                .execute_and_preview(&sql, data_source, config.preview_rows)
                .await?;
            print_table(&preview);

            let name = match name {
                Some(name) => name,
                None => {
                    let sources = catalog.list_data_sources().await?;
                    let tables: Vec<_> = sources
                        .iter()
                        .find(|s| s.id == data_source)
                        .map(|s| s.tables_by_ids(session.selection().table_ids()).collect())
                        .unwrap_or_default();
                    default_dataset_name(&query, &tables)
                }
            };
            builder.finalize_save(
                SaveRequest {
                    name,
                    description,
                    preview: Some(preview),
                    sql,
                    data_source_id: Some(data_source),
                },
                None,
            )?;
            Ok(())
        }
        Commands::Direct { data_source, tables, output } => {
            let builder = DatasetBuilder::new(catalog.clone(), gateway, Arc::new(JsonLinesSink { output }));
            let datasets = builder.direct_create_from_tables(&tables, data_source).await?;
            let sources = catalog.list_data_sources().await?;
            for dataset in &datasets {
                eprintln!("created {} [{}]: {}", dataset.name, source_label(dataset, &sources), dataset.sql);
            }
            Ok(())
        }
    }
}

async fn list_sources(catalog: Arc<dyn Catalog>) -> Result<()> {
    for source in catalog.list_data_sources().await? {
        println!("{:>4}  {}", source.id, source.name);
        for table in &source.tables {
            println!(
                "      {:>4}  {}  {}",
                table.id,
                table.name,
                table.description.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

async fn print_progress(mut progress: watch::Receiver<SessionSnapshot>) {
    let mut seen: HashMap<String, StepStatus> = HashMap::new();
    while progress.changed().await.is_ok() {
        let snapshot = progress.borrow_and_update().clone();
        for step in &snapshot.steps {
            if seen.get(&step.id) == Some(&step.status) {
                continue;
            }
            seen.insert(step.id.clone(), step.status);
            let marker = match step.status {
                StepStatus::Pending => "…",
                StepStatus::Running => "▶",
                StepStatus::Success => "✔",
                StepStatus::Error => "✘",
            };
            match &step.error {
                Some(error) => eprintln!("{} {}: {}", marker, step.label, error),
                None => eprintln!("{} {}", marker, step.label),
            }
        }
    }
}

fn print_table(data: &TableData) {
    let header: Vec<&str> = data.columns.iter().map(|c| c.name.as_str()).collect();
    println!("{}", header.join("\t"));
    for row in &data.rows {
        let cells: Vec<String> = data
            .columns
            .iter()
            .map(|c| match row.get(&c.name) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => "NULL".to_string(),
                Some(other) => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
    println!("({} rows)", data.row_count());
}
