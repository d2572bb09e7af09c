//! Read-only guard for generated SQL.
//!
//! A keyword-prefix allow-list, not a parser. A SELECT that reaches a write
//! through a data-modifying CTE or a volatile function passes here; the
//! read-only transaction and the read-only database role stop those.

use crate::error::{Result, TextToSqlError};

const EXCERPT_CHARS: usize = 50;

/// Accept `candidate` only if, trimmed and upper-cased, it starts with `SELECT`.
pub fn validate_read_only(candidate: &str) -> Result<()> {
    let normalized = candidate.trim().to_uppercase();
    if !normalized.starts_with("SELECT") {
        return Err(TextToSqlError::UnsafeQuery {
            excerpt: candidate.chars().take(EXCERPT_CHARS).collect(),
        });
    }
    Ok(())
}
