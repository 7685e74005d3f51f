
pub mod streaming;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;

pub use streaming::TokenStream;

const REQUEST_TIMEOUT_SECONDS: u64 = 120;

/// Client for an OpenAI-compatible chat completion and embedding API
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
    top_p: f64,
    temperature: f64,
    embed_batch_size: u32,
}

/// A single chat message in API wire format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user" or "assistant"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    top_p: f64,
    temperature: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    #[serde(default)]
    choices: Vec<ChatChoiceRaw>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceRaw {
    message: ChatMessageRaw,
}

#[derive(Debug, Deserialize)]
struct ChatMessageRaw {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

impl LlmClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        config
            .llm
            .api_url()
            .context("Failed to parse LLM base URL from config")?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.llm.base_url.trim_end_matches('/').to_string(),
            api_key: config.llm.api_key.clone(),
            chat_model: config.llm.chat_model.clone(),
            embedding_model: config.llm.embedding_model.clone(),
            top_p: config.llm.top_p,
            temperature: config.llm.temperature,
            embed_batch_size: config.llm.embed_batch_size,
        })
    }

    /// Send a chat completion request and return the assistant text.
    ///
    /// A response with no usable content is treated as "no answer" and
    /// returns `Ok(None)` rather than an error.
    #[inline]
    pub async fn chat_completion(&self, messages: &[ChatMessage]) -> Result<Option<String>> {
        debug!(
            model = %self.chat_model,
            message_count = messages.len(),
            "Requesting chat completion"
        );

        let request = ChatRequest {
            model: &self.chat_model,
            messages,
            top_p: self.top_p,
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .json(&request)
            .send()
            .await
            .context("Chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Chat completion API error");
            anyhow::bail!("Chat completion API error (status {}): {}", status, error_text);
        }

        let raw: ChatResponseRaw = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.is_empty());

        if content.is_none() {
            warn!("Chat completion returned no usable content");
        }

        Ok(content)
    }

    /// Send a streaming chat completion request and return a stream of
    /// incremental text deltas
    #[inline]
    pub async fn chat_completion_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        debug!(
            model = %self.chat_model,
            message_count = messages.len(),
            "Requesting streaming chat completion"
        );

        let request = ChatRequest {
            model: &self.chat_model,
            messages,
            top_p: self.top_p,
            temperature: self.temperature,
            stream: true,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Streaming chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Streaming chat completion API error");
            anyhow::bail!(
                "Streaming chat completion API error (status {}): {}",
                status,
                error_text
            );
        }

        Ok(TokenStream::new(response.bytes_stream()))
    }

    /// Generate embeddings for the given texts, batching requests to
    /// avoid oversized payloads. Output order matches input order.
    #[inline]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            model = %self.embedding_model,
            text_count = texts.len(),
            "Generating embeddings"
        );

        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.embed_batch_size as usize) {
            let batch_embeddings = self
                .embed_single_batch(batch)
                .await
                .with_context(|| format!("Failed to embed batch of {} texts", batch.len()))?;
            embeddings.extend(batch_embeddings);
        }

        Ok(embeddings)
    }

    async fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .json(&request)
            .send()
            .await
            .context("Embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Embedding API error");
            anyhow::bail!("Embedding API error (status {}): {}", status, error_text);
        }

        let raw: EmbedResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        if raw.data.len() != texts.len() {
            anyhow::bail!(
                "Mismatch between embedding request and response counts: {} vs {}",
                texts.len(),
                raw.data.len()
            );
        }

        Ok(raw.data.into_iter().map(|d| d.embedding).collect())
    }
}
