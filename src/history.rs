//! Error History
//!
//! Failed attempts of one invocation, in the order they happened, and the
//! rendering of that history into the error-correction prompt.

use crate::error::Result;
use crate::prompts::render_template;
use serde::Serialize;
use std::fmt;

pub const NO_PRIOR_ERRORS: &str = "no prior errors";
const NO_QUERY_GENERATED: &str = "(no query generated)";

/// Where in the attempt the failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttemptStage {
    Generating,
    Validating,
    Executing,
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStage::Generating => write!(f, "generating"),
            AttemptStage::Validating => write!(f, "validating"),
            AttemptStage::Executing => write!(f, "executing"),
        }
    }
}

/// One failed attempt. `generated_query` is empty when generation itself
/// failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub stage: AttemptStage,
    pub generated_query: String,
    pub error_message: String,
}

impl AttemptRecord {
    pub fn new(
        stage: AttemptStage,
        generated_query: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            generated_query: generated_query.into(),
            error_message: error_message.into(),
        }
    }

    pub fn generation_failed(error_message: impl Into<String>) -> Self {
        Self::new(AttemptStage::Generating, String::new(), error_message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorHistory {
    records: Vec<AttemptRecord>,
}

impl ErrorHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: AttemptRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.records.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttemptRecord> {
        self.records.iter()
    }

    /// Numbered summary of every failed attempt, oldest first.
    pub fn summary(&self) -> String {
        if self.records.is_empty() {
            return NO_PRIOR_ERRORS.to_string();
        }

        self.records
            .iter()
            .enumerate()
            .map(|(idx, record)| {
                let sql = if record.generated_query.is_empty() {
                    NO_QUERY_GENERATED
                } else {
                    record.generated_query.as_str()
                };
                format!(
                    "attempt {}\nsql-query: {}\nerror: {}\n",
                    idx + 1,
                    sql,
                    record.error_message
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    /// JSON array of the records, for logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.records).unwrap_or_else(|e| format!("<unserializable: {}>", e))
    }

    pub fn last_error(&self) -> &str {
        self.records
            .last()
            .map(|record| record.error_message.as_str())
            .unwrap_or("")
    }
}

/// Render the error-correction template for `user_question` and `history`.
///
/// The template may reference `user_query`, `error_history` and `last_error`.
pub fn format_error_prompt(
    template: &str,
    user_question: &str,
    history: &ErrorHistory,
) -> Result<String> {
    let summary = history.summary();
    render_template(
        template,
        &[
            ("user_query", user_question),
            ("error_history", &summary),
            ("last_error", history.last_error()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TextToSqlError;

    const TEMPLATE: &str = "Q: {user_query}\nH:\n{error_history}\nL: {last_error}";

    fn two_failures() -> ErrorHistory {
        let mut history = ErrorHistory::new();
        history.push(AttemptRecord::new(
            AttemptStage::Validating,
            "DELETE FROM videos;",
            "only SELECT queries are allowed, got: DELETE FROM videos;",
        ));
        history.push(AttemptRecord::new(
            AttemptStage::Executing,
            "SELECT COUNT(*) FROM video",
            "relation \"video\" does not exist",
        ));
        history
    }

    #[test]
    fn test_empty_history_uses_placeholder() {
        let prompt = format_error_prompt(TEMPLATE, "how many?", &ErrorHistory::new()).unwrap();
        assert_eq!(prompt, "Q: how many?\nH:\nno prior errors\nL: ");
        assert!(!prompt.contains("attempt"));
    }

    #[test]
    fn test_history_is_numbered_in_order() {
        let prompt = format_error_prompt(TEMPLATE, "how many?", &two_failures()).unwrap();
        let first = prompt.find("attempt 1\nsql-query: DELETE FROM videos;").unwrap();
        let second = prompt
            .find("attempt 2\nsql-query: SELECT COUNT(*) FROM video\nerror: relation \"video\" does not exist")
            .unwrap();
        assert!(first < second);
        assert!(prompt.ends_with("L: relation \"video\" does not exist"));
    }

    #[test]
    fn test_formatting_is_idempotent() {
        let history = two_failures();
        let a = format_error_prompt(TEMPLATE, "q", &history).unwrap();
        let b = format_error_prompt(TEMPLATE, "q", &history).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_generation_failure_marks_missing_query() {
        let mut history = ErrorHistory::new();
        history.push(AttemptRecord::generation_failed("llm returned empty response"));
        assert_eq!(
            history.summary(),
            "attempt 1\nsql-query: (no query generated)\nerror: llm returned empty response"
        );
    }

    #[test]
    fn test_history_serializes_as_json_array() {
        let json: serde_json::Value = serde_json::from_str(&two_failures().to_json()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0]["stage"], "Validating");
        assert_eq!(json[0]["generated_query"], "DELETE FROM videos;");
        assert_eq!(json[1]["stage"], "Executing");
        assert_eq!(json[1]["error_message"], "relation \"video\" does not exist");
        assert_eq!(ErrorHistory::new().to_json(), "[]");
    }

    #[test]
    fn test_unknown_template_key_fails() {
        let err = format_error_prompt("{user_query} {schema}", "q", &two_failures()).unwrap_err();
        assert!(matches!(err, TextToSqlError::PromptFormat(_)));
    }
}
