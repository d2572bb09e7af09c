//! Runtime settings, read from the environment (and `.env`).

use crate::error::{Result, TextToSqlError};
use crate::llm::DEFAULT_BASE_URL;
use crate::prompts::default_prompts_dir;
use crate::service::DEFAULT_MAX_ATTEMPTS;
use sqlx::postgres::PgConnectOptions;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub readonly_user: String,
    pub readonly_password: String,
    /// Full connection string; takes precedence over the individual fields.
    pub url_override: Option<String>,
    pub max_connections: u32,
}

impl DatabaseSettings {
    /// Connect options for the read-only role.
    pub fn readonly_connect_options(&self) -> Result<PgConnectOptions> {
        match &self.url_override {
            Some(url) => url.parse::<PgConnectOptions>().map_err(|e| {
                TextToSqlError::Config(format!("DATABASE_URL_RO is not a valid connection string: {}", e))
            }),
            None => Ok(PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .database(&self.database)
                .username(&self.readonly_user)
                .password(&self.readonly_password)),
        }
    }
}

#[derive(Clone)]
pub struct Settings {
    pub llm: LlmSettings,
    pub database: DatabaseSettings,
    pub max_attempts: usize,
    pub prompts_dir: PathBuf,
}

impl Settings {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            get(key)
                .map(str::to_string)
                .ok_or_else(|| TextToSqlError::Config(format!("{} is not set", key)))
        };
        let parsed = |key: &str, default: u64| -> Result<u64> {
            match get(key) {
                Some(raw) => raw.parse::<u64>().map_err(|_| {
                    TextToSqlError::Config(format!("{} must be a non-negative integer, got '{}'", key, raw))
                }),
                None => Ok(default),
            }
        };

        let llm = LlmSettings {
            api_key: required("OPENROUTER_API_KEY")?,
            model: required("OPENROUTER_MODEL")?,
            base_url: get("OPENROUTER_BASE_URL").unwrap_or(DEFAULT_BASE_URL).to_string(),
            timeout: Duration::from_secs(parsed("LLM_TIMEOUT_SECS", 60)?),
        };

        let url_override = get("DATABASE_URL_RO").map(str::to_string);
        let readonly_password = match &url_override {
            Some(_) => get("POSTGRES_PASSWORD_RO").unwrap_or_default().to_string(),
            None => required("POSTGRES_PASSWORD_RO")?,
        };

        let port = parsed("POSTGRES_PORT", 5432)?;
        let database = DatabaseSettings {
            host: get("POSTGRES_HOST").unwrap_or("localhost").to_string(),
            port: u16::try_from(port)
                .map_err(|_| TextToSqlError::Config(format!("POSTGRES_PORT out of range: {}", port)))?,
            database: get("POSTGRES_DB").unwrap_or("postgres").to_string(),
            readonly_user: get("POSTGRES_READONLY_USER").unwrap_or("readonly_user").to_string(),
            readonly_password,
            url_override,
            max_connections: positive_u32("DB_MAX_CONNECTIONS", parsed("DB_MAX_CONNECTIONS", 10)?)?,
        };
        database.readonly_connect_options()?;

        let max_attempts = parsed("MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS as u64)? as usize;
        if max_attempts == 0 {
            return Err(TextToSqlError::Config("MAX_ATTEMPTS must be positive".to_string()));
        }

        let prompts_dir = get("PROMPTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_prompts_dir);

        Ok(Self {
            llm,
            database,
            max_attempts,
            prompts_dir,
        })
    }
}

fn positive_u32(key: &str, raw: u64) -> Result<u32> {
    match u32::try_from(raw) {
        Ok(0) => Err(TextToSqlError::Config(format!("{} must be positive", key))),
        Ok(value) => Ok(value),
        Err(_) => Err(TextToSqlError::Config(format!("{} out of range: {}", key, raw))),
    }
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("readonly_user", &self.readonly_user)
            .field("readonly_password", &"***")
            .field("url_override", &self.url_override.as_ref().map(|_| "***"))
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("llm", &self.llm)
            .field("database", &self.database)
            .field("max_attempts", &self.max_attempts)
            .field("prompts_dir", &self.prompts_dir)
            .finish()
    }
}
