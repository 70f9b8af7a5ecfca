//! Error Classifier
//!
//! Classifies what went wrong in a generation session so the loop can decide
//! whether to retry and what to tell the next prompt.

use crate::error::BuilderError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SELECTION_FAILED_MESSAGE: &str = "AI 未能找到相关表，请手动选择表或调整描述后重试";
pub const EMPTY_GENERATION_MESSAGE: &str = "AI 未返回有效的 SQL";
pub const UNKNOWN_EXECUTION_ERROR: &str = "未知执行错误";

/// Failure taxonomy of a generation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptFailure {
    /// AI returned no usable table ids. Ends the session, never retried.
    SelectionFailure(Option<String>),
    /// AI response held no parseable SQL.
    GenerationEmpty,
    /// The gateway ran the SQL and reported failure.
    ValidationFailure(String),
    /// A gateway call itself failed.
    TransportFailure(String),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::SelectionFailure(None) => write!(f, "{}", SELECTION_FAILED_MESSAGE),
            AttemptFailure::SelectionFailure(Some(cause)) => {
                write!(f, "{} ({})", SELECTION_FAILED_MESSAGE, cause)
            }
            AttemptFailure::GenerationEmpty => write!(f, "{}", EMPTY_GENERATION_MESSAGE),
            AttemptFailure::ValidationFailure(msg) => write!(f, "{}", msg),
            AttemptFailure::TransportFailure(msg) => write!(f, "{}", msg),
        }
    }
}

impl AttemptFailure {
    /// Whether another generation attempt may follow this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttemptFailure::GenerationEmpty
                | AttemptFailure::ValidationFailure(_)
                | AttemptFailure::TransportFailure(_)
        )
    }
}

/// Error classifier
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a gateway error raised while validating or generating.
    pub fn classify(&self, error: &BuilderError) -> AttemptFailure {
        match error {
            BuilderError::Execution(msg) => AttemptFailure::ValidationFailure(msg.clone()),
            other => AttemptFailure::TransportFailure(other.to_string()),
        }
    }

    /// Classify a structured failure reported by the query gateway.
    pub fn classify_execution_message(&self, message: Option<&str>) -> AttemptFailure {
        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(UNKNOWN_EXECUTION_ERROR);
        AttemptFailure::ValidationFailure(message.to_string())
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
