use crate::history::ErrorHistory;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TextToSqlError {
    #[error("prompt file not found: {}", path.display())]
    ResourceMissing { path: PathBuf },

    #[error("llm call failed: {0}")]
    Generation(String),

    #[error("llm returned empty response")]
    EmptyGeneration,

    #[error("only SELECT queries are allowed, got: {excerpt}")]
    UnsafeQuery { excerpt: String },

    #[error("empty sql query")]
    EmptyQuery,

    #[error("query returned no results or NULL")]
    NoResult,

    #[error("query returned non-numeric value: {value} (type: {type_name})")]
    NonNumericResult { value: String, type_name: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("error on formatting prompt template: {0}")]
    PromptFormat(String),

    #[error("failed to execute query after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: usize,
        last_error: String,
        history: ErrorHistory,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TextToSqlError {
    /// Whether the failure belongs to a single attempt and should be fed back
    /// into the next one. Everything else ends the invocation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TextToSqlError::Generation(_)
                | TextToSqlError::EmptyGeneration
                | TextToSqlError::UnsafeQuery { .. }
                | TextToSqlError::EmptyQuery
                | TextToSqlError::NoResult
                | TextToSqlError::NonNumericResult { .. }
                | TextToSqlError::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TextToSqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_failures_are_retryable() {
        assert!(TextToSqlError::EmptyGeneration.is_retryable());
        assert!(TextToSqlError::NoResult.is_retryable());
        assert!(TextToSqlError::UnsafeQuery {
            excerpt: "DELETE FROM videos;".to_string()
        }
        .is_retryable());
        assert!(TextToSqlError::Database(sqlx::Error::RowNotFound).is_retryable());
    }

    #[test]
    fn test_fatal_failures_are_not_retryable() {
        assert!(!TextToSqlError::PromptFormat("missing key 'x'".to_string()).is_retryable());
        assert!(!TextToSqlError::ResourceMissing {
            path: PathBuf::from("prompts/on_error.md")
        }
        .is_retryable());
    }

    #[test]
    fn test_non_numeric_message_includes_value_and_type() {
        let err = TextToSqlError::NonNumericResult {
            value: "abc".to_string(),
            type_name: "TEXT".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "query returned non-numeric value: abc (type: TEXT)"
        );
    }
}
