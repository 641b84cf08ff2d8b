use crate::config::AppConfig;
use crate::error::{AnalystError, Result};
use crate::prompts::REFUSAL_SENTINEL;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// What a generator produced for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedQuery {
    Query(String),
    /// The generator declined; carries its message verbatim.
    Unsupported(String),
}

impl GeneratedQuery {
    /// Strip code fences and recognise the refusal sentinel.
    pub fn from_response(raw: &str) -> Self {
        let text = raw
            .trim()
            .replace("```flux", "")
            .replace("```", "")
            .trim()
            .to_string();
        if text.starts_with(REFUSAL_SENTINEL) {
            GeneratedQuery::Unsupported(text)
        } else {
            GeneratedQuery::Query(text)
        }
    }
}

/// Produces a candidate query from a system context and the turns so far.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate(&self, system_context: &str, history: &[ChatMessage]) -> Result<GeneratedQuery>;
}

/// OpenAI-compatible chat-completions client.
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalystError::Unavailable(format!("Failed to build LLM client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| AnalystError::Config("OPENAI_API_KEY is not set".to_string()))?;
        Self::new(
            api_key,
            config.openai_model.clone(),
            config.openai_base_url.clone(),
            config.request_timeout,
        )
    }

    async fn call_llm(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalystError::Unavailable(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AnalystError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if !status.is_success() {
            let message = response_json["error"]["message"]
                .as_str()
                .unwrap_or("no error message");
            return Err(AnalystError::Llm(format!("LLM API returned {}: {}", status, message)));
        }

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AnalystError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl QueryGenerator for LlmClient {
    async fn generate(&self, system_context: &str, history: &[ChatMessage]) -> Result<GeneratedQuery> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system_context));
        messages.extend_from_slice(history);

        debug!(turns = messages.len(), model = %self.model, "Requesting query from LLM");
        let content = self.call_llm(messages).await?;
        Ok(GeneratedQuery::from_response(&content))
    }
}
