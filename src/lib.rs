pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod llm;
pub mod prompts;
pub mod service;
pub mod validation;

pub use error::{Result, TextToSqlError};
pub use service::{QueryOutcome, TextToSqlService};
