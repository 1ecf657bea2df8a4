//! LLM and embedding providers.
//! Supports OpenAI and Ollama for remote/local inference.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use companion_schemas::Message;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Sampling parameters per call site. Chat replies run warmer than the
/// admin summary, which needs to stay factual.
#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationOptions {
    pub fn chat() -> Self {
        Self {
            temperature: 0.8,
            max_tokens: 600,
        }
    }

    pub fn summary() -> Self {
        Self {
            temperature: 0.4,
            max_tokens: 300,
        }
    }
}

/// Completion provider boundary. A timeout is a provider failure; retry
/// policy belongs to the caller's collaborators, not this engine.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn generate(&self, messages: &[Message], options: GenerationOptions) -> Result<String>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ============================================================================
// OpenAI
// ============================================================================

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    embedding_model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: Option<String>) -> Result<Self> {
        let client = Client::builder().timeout(PROVIDER_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            embedding_model: "text-embedding-3-small".to_string(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn generate(&self, messages: &[Message], options: GenerationOptions) -> Result<String> {
        let payload: Vec<_> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        let request_body = json!({
            "model": self.model,
            "messages": payload,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "presence_penalty": 0.3,
            "frequency_penalty": 0.2,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let response_json: OpenAiChatResponse = response.json().await?;

        response_json
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| anyhow!("Empty response from OpenAI"))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request_body = json!({
            "model": self.embedding_model,
            "input": text,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("OpenAI embeddings error: {}", error_text));
        }

        let response_json: OpenAiEmbeddingResponse = response.json().await?;

        response_json
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("Empty embedding from OpenAI"))
    }
}

// ============================================================================
// Ollama (local inference)
// ============================================================================

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(model: Option<String>, base_url: Option<String>) -> Result<Self> {
        let client = Client::builder().timeout(PROVIDER_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: model.unwrap_or_else(|| "llama3.2".to_string()),
        })
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn generate(&self, messages: &[Message], options: GenerationOptions) -> Result<String> {
        let payload: Vec<_> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        let request_body = json!({
            "model": self.model,
            "messages": payload,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            }
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Ollama API error: {}", error_text));
        }

        let response_json: OllamaChatResponse = response.json().await?;
        Ok(response_json.message.content)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request_body = json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Ollama embeddings error: {}", error_text));
        }

        let response_json: OllamaEmbeddingResponse = response.json().await?;
        Ok(response_json.embedding)
    }
}

// Response structures
#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}
