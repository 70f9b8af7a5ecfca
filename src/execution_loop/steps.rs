//! Generation step log
//!
//! Ordered, append-only record of the phases a session went through. Entries
//! are never removed; only their status changes, and only forward
//! (pending/running to success/error).

use serde::{Deserialize, Serialize};

pub const PREPARE_STEP_ID: &str = "prepare";
pub const SELECT_STEP_ID: &str = "select";

/// Annotation put on steps that were still running when the user cancelled.
pub const CANCELLED_NOTE: &str = "用户已取消";

pub fn generation_step_id(attempt: u8) -> String {
    format!("gen-{}", attempt)
}

pub fn validation_step_id(attempt: u8) -> String {
    format!("test-{}", attempt)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl StepStatus {
    pub fn is_resolved(self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStep {
    pub id: String,
    pub label: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLog {
    steps: Vec<GenerationStep>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a running step. Starting an id that already exists restarts
    /// that entry in place instead of duplicating it.
    pub fn start(&mut self, id: impl Into<String>, label: impl Into<String>) {
        let id = id.into();
        let label = label.into();
        if let Some(step) = self.find_mut(&id) {
            step.label = label;
            step.status = StepStatus::Running;
            step.error = None;
            return;
        }
        self.steps.push(GenerationStep {
            id,
            label,
            status: StepStatus::Running,
            error: None,
        });
    }

    pub fn succeed(&mut self, id: &str) {
        if let Some(step) = self.find_mut(id) {
            step.status = StepStatus::Success;
            step.error = None;
        }
    }

    pub fn fail(&mut self, id: &str, error: impl Into<String>) {
        if let Some(step) = self.find_mut(id) {
            step.status = StepStatus::Error;
            step.error = Some(error.into());
        }
    }

    /// Marks every still-running step as errored with the cancellation note.
    /// Returns how many steps were closed.
    pub fn cancel_running(&mut self) -> usize {
        let mut closed = 0;
        for step in self.steps.iter_mut().filter(|s| s.status == StepStatus::Running) {
            step.status = StepStatus::Error;
            step.error = Some(CANCELLED_NOTE.to_string());
            closed += 1;
        }
        closed
    }

    /// Closes any step left open by an unexpected exit path.
    pub fn fail_running(&mut self, error: &str) {
        for step in self.steps.iter_mut().filter(|s| !s.status.is_resolved()) {
            step.status = StepStatus::Error;
            step.error = Some(error.to_string());
        }
    }

    pub fn get(&self, id: &str) -> Option<&GenerationStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn steps(&self) -> &[GenerationStep] {
        &self.steps
    }

    pub fn has_open_steps(&self) -> bool {
        self.steps.iter().any(|s| !s.status.is_resolved())
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut GenerationStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_keep_chronological_order() {
        let mut log = StepLog::new();
        log.start(PREPARE_STEP_ID, "prepare");
        log.succeed(PREPARE_STEP_ID);
        log.start(generation_step_id(1), "gen");
        log.fail(&generation_step_id(1), "empty");

        let ids: Vec<_> = log.steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["prepare", "gen-1"]);
        assert_eq!(log.get("gen-1").unwrap().error.as_deref(), Some("empty"));
        assert!(!log.has_open_steps());
    }

    #[test]
    fn test_cancel_running_only_touches_running_steps() {
        let mut log = StepLog::new();
        log.start("gen-1", "gen");
        log.succeed("gen-1");
        log.start("test-1", "test");

        assert_eq!(log.cancel_running(), 1);
        assert_eq!(log.get("gen-1").unwrap().status, StepStatus::Success);
        let test = log.get("test-1").unwrap();
        assert_eq!(test.status, StepStatus::Error);
        assert_eq!(test.error.as_deref(), Some(CANCELLED_NOTE));
    }

    #[test]
    fn test_restart_does_not_duplicate() {
        let mut log = StepLog::new();
        log.start("select", "a");
        log.fail("select", "boom");
        log.start("select", "b");
        assert_eq!(log.steps().len(), 1);
        assert_eq!(log.get("select").unwrap().status, StepStatus::Running);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&StepStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
