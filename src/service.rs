//! Text-to-SQL service
//!
//! Bounded translate, validate, execute loop. Each failed attempt is recorded
//! and fed back to the generator through the error-correction prompt.

use crate::db::ScalarExecutor;
use crate::error::{Result, TextToSqlError};
use crate::history::{format_error_prompt, AttemptRecord, AttemptStage, ErrorHistory};
use crate::llm::SqlGenerator;
use crate::prompts::PromptStore;
use crate::validation::validate_read_only;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Successful invocation.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub value: i64,
    /// 1-based number of the attempt that succeeded.
    pub attempts: usize,
    /// Failures that preceded the successful attempt.
    pub history: ErrorHistory,
}

enum AttemptResult {
    Succeeded(i64),
    Failed(AttemptRecord),
}

/// Shared collaborators plus configuration. Per-invocation state lives in
/// `run`, so one service can serve many questions concurrently.
pub struct TextToSqlService {
    generator: Arc<dyn SqlGenerator>,
    executor: Arc<dyn ScalarExecutor>,
    prompts: Arc<PromptStore>,
    max_attempts: usize,
}

impl TextToSqlService {
    pub fn new(
        generator: Arc<dyn SqlGenerator>,
        executor: Arc<dyn ScalarExecutor>,
        prompts: PromptStore,
    ) -> Self {
        Self {
            generator,
            executor,
            prompts: Arc::new(prompts),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Answer `user_question` with a single integer.
    pub async fn process_query(&self, user_question: &str) -> Result<i64> {
        self.run(user_question).await.map(|outcome| outcome.value)
    }

    /// Like `process_query`, but also reports how the answer was reached.
    pub async fn run(&self, user_question: &str) -> Result<QueryOutcome> {
        let span = info_span!(
            "process_query",
            request_id = %uuid::Uuid::new_v4(),
            question = %user_question
        );
        self.run_attempts(user_question).instrument(span).await
    }

    async fn run_attempts(&self, user_question: &str) -> Result<QueryOutcome> {
        info!("user query: {}", user_question);

        let mut history = ErrorHistory::new();

        for attempt in 0..self.max_attempts {
            info!(
                "attempt {}/{} for query: {}",
                attempt + 1,
                self.max_attempts,
                user_question
            );

            match self.attempt(user_question, &history).await? {
                AttemptResult::Succeeded(value) => {
                    info!("query succeeded on {} attempt result: {}", attempt + 1, value);
                    return Ok(QueryOutcome {
                        value,
                        attempts: attempt + 1,
                        history,
                    });
                }
                AttemptResult::Failed(record) => {
                    warn!(
                        "attempt {} failed while {}: {}",
                        attempt + 1,
                        record.stage,
                        record.error_message
                    );
                    history.push(record);
                }
            }
        }

        warn!(
            "query failed after {} attempts, history: {}",
            history.len(),
            history.to_json()
        );
        let last_error = history.last_error().to_string();
        Err(TextToSqlError::RetriesExhausted {
            attempts: history.len(),
            last_error,
            history,
        })
    }

    /// One generate, validate, execute cycle. Per-attempt failures come back
    /// as `Failed`; only fatal errors are returned as `Err`.
    async fn attempt(&self, user_question: &str, history: &ErrorHistory) -> Result<AttemptResult> {
        // Generating
        let instruction = if history.is_empty() {
            self.prompts.on_start().to_string()
        } else {
            format_error_prompt(self.prompts.on_error(), user_question, history)?
        };

        let sql = match self.generator.generate(user_question, &instruction).await {
            Ok(sql) => sql,
            Err(e) => return record_or_abort(e, |message| AttemptRecord::generation_failed(message)),
        };

        // Validating
        if let Err(e) = validate_read_only(&sql) {
            return record_or_abort(e, |message| {
                AttemptRecord::new(AttemptStage::Validating, sql.clone(), message)
            });
        }

        // Executing
        match self.executor.execute(&sql).await {
            Ok(value) => Ok(AttemptResult::Succeeded(value)),
            Err(e) => record_or_abort(e, |message| {
                AttemptRecord::new(AttemptStage::Executing, sql.clone(), message)
            }),
        }
    }
}

fn record_or_abort(
    error: TextToSqlError,
    record: impl FnOnce(String) -> AttemptRecord,
) -> Result<AttemptResult> {
    if error.is_retryable() {
        Ok(AttemptResult::Failed(record(error.to_string())))
    } else {
        Err(error)
    }
}
