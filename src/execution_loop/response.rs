//! Normalization of the assistant's SQL-generation answer.

use crate::gateway::GenerationResponse;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)```").unwrap();
}

/// A non-empty SQL statement proposed by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlCandidate {
    pub sql: String,
    pub explanation: Option<String>,
}

#[derive(Deserialize)]
struct RawPayload {
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

/// Turns either response shape into a candidate. `None` means the attempt
/// produced nothing executable.
pub fn normalize(response: GenerationResponse) -> Option<SqlCandidate> {
    match response {
        GenerationResponse::Structured { sql, explanation } => candidate(Some(sql), explanation),
        GenerationResponse::RawText { content } => {
            let payload: RawPayload = serde_json::from_str(strip_code_fence(&content)).ok()?;
            candidate(payload.sql, payload.explanation)
        }
        GenerationResponse::Unrecognized(_) => None,
    }
}

/// Returns the body of the first fenced block, or the trimmed text when
/// there is no fence.
pub fn strip_code_fence(text: &str) -> &str {
    match CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim(),
        None => text.trim(),
    }
}

fn candidate(sql: Option<String>, explanation: Option<String>) -> Option<SqlCandidate> {
    let sql = sql?.trim().to_string();
    if sql.is_empty() {
        return None;
    }
    Some(SqlCandidate {
        sql,
        explanation: explanation.filter(|e| !e.trim().is_empty()),
    })
}
