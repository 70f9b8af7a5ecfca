//! Generation session state machine
//!
//! `transition` is a pure function over `(state, event)`; the orchestrator
//! feeds it events and the session keeps the working data around it.

use crate::error::{BuilderError, Result};
use crate::execution_loop::steps::{GenerationStep, StepLog};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "attempt", rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Selecting,
    Generating(u8),
    Validating(u8),
    Done,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed | SessionState::Cancelled)
    }

    pub fn attempt(self) -> Option<u8> {
        match self {
            SessionState::Generating(n) | SessionState::Validating(n) => Some(n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Context is ready; `locked` skips the selection phase.
    Start { locked: bool },
    TablesSelected,
    SelectionFailed,
    SqlGenerated,
    /// Generation or validation of the current attempt failed.
    AttemptFailed,
    ValidationPassed,
    Cancel,
    /// Unrecoverable failure outside the attempt loop (e.g. missing source).
    Abort,
}

pub fn transition(state: SessionState, event: SessionEvent, max_attempts: u8) -> Result<SessionState> {
    use SessionEvent as E;
    use SessionState as S;

    let next = match (state, event) {
        (s, _) if s.is_terminal() => None,
        (_, E::Cancel) => Some(S::Cancelled),
        (_, E::Abort) => Some(S::Failed),
        (S::Idle, E::Start { locked: false }) => Some(S::Selecting),
        (S::Idle, E::Start { locked: true }) => Some(S::Generating(1)),
        (S::Selecting, E::TablesSelected) => Some(S::Generating(1)),
        (S::Selecting, E::SelectionFailed) => Some(S::Failed),
        (S::Generating(n), E::SqlGenerated) => Some(S::Validating(n)),
        (S::Generating(n), E::AttemptFailed) | (S::Validating(n), E::AttemptFailed) => {
            if n < max_attempts {
                Some(S::Generating(n + 1))
            } else {
                Some(S::Failed)
            }
        }
        (S::Validating(_), E::ValidationPassed) => Some(S::Done),
        _ => None,
    };

    next.ok_or_else(|| BuilderError::InvalidTransition(format!("{:?} on {:?}", event, state)))
}

/// User- or AI-populated table set. Locking pins the set: the AI selection
/// phase is skipped and manual edits are refused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSelection {
    table_ids: Vec<i64>,
    locked: bool,
}

impl TableSelection {
    pub fn new(table_ids: Vec<i64>, locked: bool) -> Self {
        let mut selection = Self { table_ids: Vec::new(), locked };
        for id in table_ids {
            if !selection.table_ids.contains(&id) {
                selection.table_ids.push(id);
            }
        }
        selection
    }

    pub fn table_ids(&self) -> &[i64] {
        &self.table_ids
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Adds the table if absent, removes it otherwise. Returns whether the
    /// table is selected afterwards.
    pub fn toggle(&mut self, table_id: i64) -> Result<bool> {
        self.ensure_unlocked()?;
        if let Some(pos) = self.table_ids.iter().position(|id| *id == table_id) {
            self.table_ids.remove(pos);
            Ok(false)
        } else {
            self.table_ids.push(table_id);
            Ok(true)
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        self.ensure_unlocked()?;
        self.table_ids.clear();
        Ok(())
    }

    /// Replaces the set with the assistant's choice. Only valid while unlocked.
    pub fn replace(&mut self, table_ids: Vec<i64>) -> Result<()> {
        self.ensure_unlocked()?;
        *self = Self::new(table_ids, false);
        Ok(())
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.locked {
            return Err(BuilderError::Validation("表选择已锁定，无法修改".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub data_source_id: Option<i64>,
    pub query: String,
    pub selection: TableSelection,
}

impl GenerationRequest {
    pub fn new(data_source_id: i64, query: impl Into<String>, selected_table_ids: Vec<i64>, locked: bool) -> Self {
        Self {
            data_source_id: Some(data_source_id),
            query: query.into(),
            selection: TableSelection::new(selected_table_ids, locked),
        }
    }
}

/// What subscribers see after every change of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: Option<SessionState>,
    pub attempt: u8,
    pub steps: Vec<GenerationStep>,
}

#[derive(Debug, Clone)]
pub struct GenerationSession {
    data_source_id: Option<i64>,
    query: String,
    selection: TableSelection,
    state: SessionState,
    max_attempts: u8,
    attempt: u8,
    last_error: Option<String>,
    sql: Option<String>,
    explanation: Option<String>,
    message: Option<String>,
    steps: StepLog,
}

impl GenerationSession {
    pub fn new(request: GenerationRequest, max_attempts: u8) -> Self {
        Self {
            data_source_id: request.data_source_id,
            query: request.query,
            selection: request.selection,
            state: SessionState::Idle,
            max_attempts,
            attempt: 0,
            last_error: None,
            sql: None,
            explanation: None,
            message: None,
            steps: StepLog::new(),
        }
    }

    /// Applies an event through `transition`, tracking the attempt counter.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionState> {
        let next = transition(self.state, event, self.max_attempts)?;
        if let Some(attempt) = next.attempt() {
            self.attempt = attempt;
        }
        self.state = next;
        Ok(next)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: Some(self.state),
            attempt: self.attempt,
            steps: self.steps.steps().to_vec(),
        }
    }

    pub fn data_source_id(&self) -> Option<i64> {
        self.data_source_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn selection(&self) -> &TableSelection {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut TableSelection {
        &mut self.selection
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    pub fn attempts(&self) -> u8 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_last_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    pub fn set_candidate(&mut self, sql: String, explanation: Option<String>) {
        self.sql = Some(sql);
        self.explanation = explanation;
    }

    /// Summary message shown to the user when the session ended.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn steps(&self) -> &StepLog {
        &self.steps
    }

    pub fn steps_mut(&mut self) -> &mut StepLog {
        &mut self.steps
    }
}
