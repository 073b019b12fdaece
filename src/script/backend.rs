use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::{Result, VideoError};

/// Request sent to a generative-text backend
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
}

/// Trait for generative-text backends
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Generate text for a prompt
    async fn generate(&self, request: &TextRequest) -> Result<String>;

    /// Get the name of this backend
    fn backend_name(&self) -> &'static str;
}

/// Gemini-style structured generation backend
pub struct GeminiTextBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiTextBackend {
    pub fn new(api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(VideoError::Configuration(
                "Gemini API key not found. Set providers.gemini_api_key in the config file"
                    .to_string(),
            ));
        }

        Ok(Self {
            client: Client::new(),
            api_key: api_key.trim().to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1/models".to_string(),
        })
    }
}

#[async_trait]
impl TextBackend for GeminiTextBackend {
    async fn generate(&self, request: &TextRequest) -> Result<String> {
        let url = format!("{}/{}:generateContent", self.base_url, request.model);

        let body = json!({
            "contents": [{
                "parts": [{ "text": request.prompt }]
            }],
            "generationConfig": {
                "temperature": 0.7,
                "topK": 40,
                "topP": 0.95,
                "maxOutputTokens": request.max_tokens,
            }
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| VideoError::from_request(self.backend_name(), e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VideoError::from_status(self.backend_name(), status, &text));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| VideoError::from_request(self.backend_name(), e))?;

        result["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| VideoError::Validation {
                backend: self.backend_name().to_string(),
                message: "response carries no generated text".to_string(),
            })
    }

    fn backend_name(&self) -> &'static str {
        "gemini"
    }
}

/// Claude-style messages backend, used as the fallback text generator
pub struct ClaudeTextBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

impl ClaudeTextBackend {
    pub fn new(api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(VideoError::Configuration(
                "Claude API key not found. Set providers.claude_api_key in the config file"
                    .to_string(),
            ));
        }

        Ok(Self {
            client: Client::new(),
            api_key: api_key.trim().to_string(),
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
        })
    }
}

#[async_trait]
impl TextBackend for ClaudeTextBackend {
    async fn generate(&self, request: &TextRequest) -> Result<String> {
        let body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": [{ "role": "user", "content": request.prompt }],
        });

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| VideoError::from_request(self.backend_name(), e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VideoError::from_status(self.backend_name(), status, &text));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| VideoError::from_request(self.backend_name(), e))?;

        result["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| VideoError::Validation {
                backend: self.backend_name().to_string(),
                message: "response carries no message content".to_string(),
            })
    }

    fn backend_name(&self) -> &'static str {
        "claude"
    }
}
