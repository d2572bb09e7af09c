use crate::error::{Result, TextToSqlError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Turns a question into SQL text under a system instruction.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Returns the trimmed text of the first completion.
    async fn generate(&self, user_question: &str, instruction: &str) -> Result<String>;
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Self::with_options(api_key, model, DEFAULT_BASE_URL.to_string(), Duration::from_secs(60))
    }

    pub fn with_options(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TextToSqlError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_llm(&self, system_prompt: &str, user_message: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_message}
            ]
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TextToSqlError::Generation(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TextToSqlError::Generation(format!(
                "LLM API returned {}: {}",
                status, text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TextToSqlError::Generation(format!("Failed to parse LLM response: {}", e)))?;

        let choice = response_json["choices"]
            .get(0)
            .ok_or_else(|| TextToSqlError::Generation("No choices in LLM response".to_string()))?;

        let content = choice["message"]["content"].as_str().unwrap_or("").trim();
        if content.is_empty() {
            return Err(TextToSqlError::EmptyGeneration);
        }

        Ok(content.to_string())
    }
}

#[async_trait]
impl SqlGenerator for LlmClient {
    async fn generate(&self, user_question: &str, instruction: &str) -> Result<String> {
        match self.call_llm(instruction, user_question).await {
            Ok(sql) => {
                debug!("llm generated sql: {}", sql);
                Ok(sql)
            }
            Err(e) => {
                error!("llm call failed: {}", e);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"***")
            .finish()
    }
}
