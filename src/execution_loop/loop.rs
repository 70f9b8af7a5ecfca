//! Execution Loop
//!
//! Bounded, cancellable generate-and-test loop. Each attempt asks the
//! assistant for SQL, runs it through the query gateway with a tiny row
//! limit, and on failure feeds the error into the next attempt's prompt.

use crate::config::GenerationConfig;
use crate::execution_loop::error_classifier::{AttemptFailure, ErrorClassifier};
use crate::execution_loop::response::normalize;
use crate::execution_loop::session::{
    GenerationRequest, GenerationSession, SessionEvent, SessionSnapshot, SessionState,
};
use crate::execution_loop::steps::{
    generation_step_id, validation_step_id, PREPARE_STEP_ID, SELECT_STEP_ID,
};
use crate::gateway::{AssistantGateway, Catalog, QueryGateway};
use crate::metadata::DataSource;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Prompt used when the user left the request blank.
pub const DEFAULT_QUERY: &str = "查询所选表的所有数据";
pub const CANCELLED_MESSAGE: &str = "SQL 生成已被用户取消";

pub fn build_prompt(query: &str, previous_error: Option<&str>) -> String {
    let query = query.trim();
    let base = if query.is_empty() { DEFAULT_QUERY } else { query };
    match previous_error {
        Some(error) => format!(
            "{}\n\n上一次生成的 SQL 执行失败，错误信息：{}\n请修正 SQL 并确保它可以在该数据源上执行。",
            base, error
        ),
        None => base.to_string(),
    }
}

pub fn exhausted_message(attempts: u8, last_error: Option<&str>) -> String {
    format!(
        "SQL 生成失败，已重试 {} 次。最后错误：{}",
        attempts,
        last_error.unwrap_or("未知错误")
    )
}

/// Orchestrates table selection, SQL generation and validation.
///
/// Progress of the running session is published on a watch channel; see
/// [`SqlGenerationOrchestrator::subscribe`].
pub struct SqlGenerationOrchestrator {
    catalog: Arc<dyn Catalog>,
    assistant: Arc<dyn AssistantGateway>,
    query_gateway: Arc<dyn QueryGateway>,
    config: GenerationConfig,
    error_classifier: ErrorClassifier,
    progress: watch::Sender<SessionSnapshot>,
}

/// Outcome of a single checked remote call.
enum Checked<T> {
    Value(T),
    Cancelled,
}

impl SqlGenerationOrchestrator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        assistant: Arc<dyn AssistantGateway>,
        query_gateway: Arc<dyn QueryGateway>,
        config: GenerationConfig,
    ) -> Self {
        let (progress, _) = watch::channel(SessionSnapshot::default());
        Self {
            catalog,
            assistant,
            query_gateway,
            config,
            error_classifier: ErrorClassifier::new(),
            progress,
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Receives a snapshot after every state or step change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.progress.subscribe()
    }

    /// Runs one generation session to a terminal state.
    ///
    /// Never returns an error: every failure ends up in the step log and the
    /// session's summary message.
    pub async fn start_generation(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> GenerationSession {
        let mut session = GenerationSession::new(request, self.config.max_attempts);
        self.publish(&session);
        info!(
            "Starting SQL generation (data source {:?}, locked: {})",
            session.data_source_id(),
            session.selection().is_locked()
        );

        self.run(&mut session, cancel).await;

        if session.steps().has_open_steps() {
            warn!("Closing steps left open at {:?}", session.state());
            let note = session.message().unwrap_or("会话已结束").to_string();
            session.steps_mut().fail_running(&note);
        }
        self.publish(&session);
        info!(
            "SQL generation finished in state {:?} after {} attempt(s)",
            session.state(),
            session.attempts()
        );
        session
    }

    async fn run(&self, session: &mut GenerationSession, cancel: &CancellationToken) {
        let source = match self.prepare(session, cancel).await {
            Checked::Value(Some(source)) => source,
            Checked::Value(None) => return,
            Checked::Cancelled => return,
        };

        let locked = session.selection().is_locked();
        if self.advance(session, SessionEvent::Start { locked }).is_none() {
            return;
        }

        if !locked {
            match self.select_tables(session, &source, cancel).await {
                Checked::Value(true) => {}
                Checked::Value(false) | Checked::Cancelled => return,
            }
        }

        self.generate_and_validate(session, &source, cancel).await;
    }

    /// Context preparation: resolve the target data source from the catalog.
    async fn prepare(
        &self,
        session: &mut GenerationSession,
        cancel: &CancellationToken,
    ) -> Checked<Option<DataSource>> {
        session.steps_mut().start(PREPARE_STEP_ID, "准备数据源上下文");
        self.publish(session);

        let data_source_id = match session.data_source_id() {
            Some(id) => id,
            None => {
                self.abort(session, PREPARE_STEP_ID, "请先选择数据源");
                return Checked::Value(None);
            }
        };

        if self.check_cancelled(session, cancel, "before catalog lookup") {
            return Checked::Cancelled;
        }
        let listed = self.catalog.list_data_sources().await;
        if self.check_cancelled(session, cancel, "after catalog lookup") {
            return Checked::Cancelled;
        }

        let source = match listed {
            Ok(sources) => sources.into_iter().find(|s| s.id == data_source_id),
            Err(e) => {
                self.abort(session, PREPARE_STEP_ID, &format!("加载数据源失败：{}", e));
                return Checked::Value(None);
            }
        };

        match source {
            Some(source) => {
                debug!("Resolved data source {} ({} tables)", source.name, source.tables.len());
                session.steps_mut().succeed(PREPARE_STEP_ID);
                self.publish(session);
                Checked::Value(Some(source))
            }
            None => {
                self.abort(
                    session,
                    PREPARE_STEP_ID,
                    &format!("数据源 {} 不存在", data_source_id),
                );
                Checked::Value(None)
            }
        }
    }

    /// AI table selection. Failure ends the session; it is never retried.
    async fn select_tables(
        &self,
        session: &mut GenerationSession,
        source: &DataSource,
        cancel: &CancellationToken,
    ) -> Checked<bool> {
        if self.check_cancelled(session, cancel, "before table selection") {
            return Checked::Cancelled;
        }
        session.steps_mut().start(SELECT_STEP_ID, "AI 自动选择相关表");
        self.publish(session);

        let response = self.assistant.select_tables(source.id, session.query()).await;
        if self.check_cancelled(session, cancel, "after table selection") {
            return Checked::Cancelled;
        }

        let failure = match response {
            Ok(selection) if !selection.selected_table_ids.is_empty() => {
                let names: Vec<&str> = source
                    .tables_by_ids(&selection.selected_table_ids)
                    .map(|t| t.name.as_str())
                    .collect();
                info!("AI selected tables {:?} {:?}", selection.selected_table_ids, names);
                let replaced = session.selection_mut().replace(selection.selected_table_ids);
                if let Err(e) = replaced {
                    AttemptFailure::SelectionFailure(Some(e.to_string()))
                } else {
                    session.steps_mut().succeed(SELECT_STEP_ID);
                    if self.advance(session, SessionEvent::TablesSelected).is_none() {
                        return Checked::Value(false);
                    }
                    self.publish(session);
                    return Checked::Value(true);
                }
            }
            Ok(_) => AttemptFailure::SelectionFailure(None),
            Err(e) => AttemptFailure::SelectionFailure(Some(e.to_string())),
        };

        warn!("Table selection failed: {}", failure);
        let message = failure.to_string();
        session.steps_mut().fail(SELECT_STEP_ID, message.clone());
        session.set_message(message);
        self.advance(session, SessionEvent::SelectionFailed);
        self.publish(session);
        Checked::Value(false)
    }

    async fn generate_and_validate(
        &self,
        session: &mut GenerationSession,
        source: &DataSource,
        cancel: &CancellationToken,
    ) {
        while let SessionState::Generating(attempt) = session.state() {
            info!("Generation attempt {} of {}", attempt, session.max_attempts());

            let failure = match self.run_attempt(session, source, attempt, cancel).await {
                Checked::Cancelled => return,
                Checked::Value(None) => return,
                Checked::Value(Some(failure)) => failure,
            };

            warn!("Attempt {} failed: {}", attempt, failure);
            session.set_last_error(failure.to_string());
            if !failure.is_retryable() {
                let message = failure.to_string();
                session.steps_mut().fail_running(&message);
                session.set_message(message);
                self.advance(session, SessionEvent::Abort);
                self.publish(session);
                return;
            }
            if self.advance(session, SessionEvent::AttemptFailed).is_none() {
                return;
            }

            if session.state() == SessionState::Failed {
                let message = exhausted_message(attempt, session.last_error());
                session.set_message(message);
                self.publish(session);
                return;
            }
            self.publish(session);

            if self.check_cancelled(session, cancel, "before retry delay") {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.check_cancelled(session, cancel, "during retry delay");
                    return;
                }
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }
    }

    /// One generate-then-validate attempt. `Value(None)` means the attempt
    /// succeeded and the session is done.
    async fn run_attempt(
        &self,
        session: &mut GenerationSession,
        source: &DataSource,
        attempt: u8,
        cancel: &CancellationToken,
    ) -> Checked<Option<AttemptFailure>> {
        let gen_id = generation_step_id(attempt);
        let previous_error = if attempt > 1 { session.last_error() } else { None };
        let prompt = build_prompt(session.query(), previous_error);

        if self.check_cancelled(session, cancel, "before SQL generation") {
            return Checked::Cancelled;
        }
        let label = format!("生成 SQL（第 {}/{} 次尝试）", attempt, session.max_attempts());
        session.steps_mut().start(gen_id.clone(), label);
        self.publish(session);

        let response = self
            .assistant
            .generate_dataset_sql(
                source.id,
                session.selection().table_ids(),
                &prompt,
                session.selection().is_locked(),
            )
            .await;
        if self.check_cancelled(session, cancel, "after SQL generation") {
            return Checked::Cancelled;
        }

        let candidate = match response {
            Ok(response) => match normalize(response) {
                Some(candidate) => candidate,
                None => {
                    let failure = AttemptFailure::GenerationEmpty;
                    session.steps_mut().fail(&gen_id, failure.to_string());
                    return Checked::Value(Some(failure));
                }
            },
            Err(e) => {
                let failure = self.error_classifier.classify(&e);
                session.steps_mut().fail(&gen_id, failure.to_string());
                return Checked::Value(Some(failure));
            }
        };

        debug!("Candidate SQL: {}", candidate.sql);
        session.steps_mut().succeed(&gen_id);
        session.set_candidate(candidate.sql.clone(), candidate.explanation);
        if self.advance(session, SessionEvent::SqlGenerated).is_none() {
            return Checked::Value(None);
        }

        let test_id = validation_step_id(attempt);
        if self.check_cancelled(session, cancel, "before SQL validation") {
            return Checked::Cancelled;
        }
        let label = format!("测试 SQL（第 {}/{} 次尝试）", attempt, session.max_attempts());
        session.steps_mut().start(test_id.clone(), label);
        self.publish(session);

        let executed = self
            .query_gateway
            .execute_sql(&source.connection, &candidate.sql, self.config.validation_row_limit)
            .await;
        if self.check_cancelled(session, cancel, "after SQL validation") {
            return Checked::Cancelled;
        }

        let failure = match executed {
            Ok(result) if result.success => {
                info!("SQL validated on attempt {}", attempt);
                session.steps_mut().succeed(&test_id);
                self.advance(session, SessionEvent::ValidationPassed);
                self.publish(session);
                return Checked::Value(None);
            }
            Ok(result) => self
                .error_classifier
                .classify_execution_message(result.message.as_deref()),
            Err(e) => self.error_classifier.classify(&e),
        };

        session.steps_mut().fail(&test_id, failure.to_string());
        Checked::Value(Some(failure))
    }

    /// Cooperative cancellation check point. When the token is set, closes
    /// running steps and moves the session to `Cancelled`.
    fn check_cancelled(&self, session: &mut GenerationSession, cancel: &CancellationToken, point: &str) -> bool {
        if !cancel.is_cancelled() {
            return false;
        }
        if session.state() != SessionState::Cancelled {
            info!("Cancellation observed {}", point);
            session.steps_mut().cancel_running();
            session.set_message(CANCELLED_MESSAGE);
            self.advance(session, SessionEvent::Cancel);
            self.publish(session);
        }
        true
    }

    fn abort(&self, session: &mut GenerationSession, step_id: &str, message: &str) {
        warn!("Aborting session: {}", message);
        session.steps_mut().fail(step_id, message);
        session.set_message(message);
        self.advance(session, SessionEvent::Abort);
        self.publish(session);
    }

    fn advance(&self, session: &mut GenerationSession, event: SessionEvent) -> Option<SessionState> {
        match session.apply(event) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    fn publish(&self, session: &GenerationSession) {
        self.progress.send_replace(session.snapshot());
    }
}
