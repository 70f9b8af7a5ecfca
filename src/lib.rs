pub mod config;
pub mod dataset;
pub mod error;
pub mod execution_loop;
pub mod gateway;
pub mod metadata;

pub use config::{BuilderConfig, GenerationConfig};
pub use dataset::{Dataset, DatasetBuilder, DatasetSink, SaveRequest, SourceRef, TableData};
pub use error::{BuilderError, Result};
pub use execution_loop::{GenerationRequest, GenerationSession, SessionState, SqlGenerationOrchestrator};
pub use metadata::{Column, DataSource, StaticCatalog, Table};
