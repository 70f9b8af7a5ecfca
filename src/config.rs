//! Builder configuration, read from the environment (after `.env` loading).

use crate::error::{BuilderError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Hard ceiling on generation attempts per session.
pub const MAX_GENERATION_ATTEMPTS: u8 = 5;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_PREVIEW_ROWS: usize = 100;

/// Row limit used when a candidate statement is only run to prove it works.
pub const VALIDATION_ROW_LIMIT: usize = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub max_attempts: u8,
    pub retry_delay: Duration,
    pub validation_row_limit: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_GENERATION_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            validation_row_limit: VALIDATION_ROW_LIMIT,
        }
    }
}

impl GenerationConfig {
    /// Sets the attempt budget, clamped to `1..=MAX_GENERATION_ATTEMPTS`.
    pub fn with_max_attempts(mut self, max_attempts: u8) -> Self {
        self.max_attempts = max_attempts.clamp(1, MAX_GENERATION_ATTEMPTS);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuilderConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub catalog_path: Option<PathBuf>,
    pub preview_rows: usize,
    pub generation: GenerationConfig,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            catalog_path: None,
            preview_rows: DEFAULT_PREVIEW_ROWS,
            generation: GenerationConfig::default(),
        }
    }
}

impl BuilderConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATASET_BUILDER_API_URL") {
            config.api_url = url;
        }
        config.api_key = lookup("DATASET_BUILDER_API_KEY").filter(|k| !k.is_empty());
        config.catalog_path = lookup("DATASET_BUILDER_CATALOG").map(PathBuf::from);

        if let Some(raw) = lookup("DATASET_BUILDER_MAX_ATTEMPTS") {
            let attempts: u8 = parse_var("DATASET_BUILDER_MAX_ATTEMPTS", &raw)?;
            config.generation = config.generation.with_max_attempts(attempts);
        }
        if let Some(raw) = lookup("DATASET_BUILDER_RETRY_DELAY_MS") {
            let millis: u64 = parse_var("DATASET_BUILDER_RETRY_DELAY_MS", &raw)?;
            config.generation = config.generation.with_retry_delay(Duration::from_millis(millis));
        }
        if let Some(raw) = lookup("DATASET_BUILDER_PREVIEW_ROWS") {
            config.preview_rows = parse_var("DATASET_BUILDER_PREVIEW_ROWS", &raw)?;
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| BuilderError::Config(format!("{}={:?}: {}", key, raw, e)))
}
