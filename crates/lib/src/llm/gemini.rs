//! Gemini API client (https://generativelanguage.googleapis.com by default).
//! Non-streaming `generateContent` only.

use super::{BackendFactory, CompletionBackend, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Client for the Gemini HTTP API.
#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(base_url: Option<String>, model: String, api_key: String) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            model,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// POST /v1beta/models/{model}:generateContent — single-turn completion.
    pub async fn generate_content(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
        };
        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let data: GenerateContentResponse = res.json().await?;
        data.text().ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.generate_content(prompt).await
    }
}

/// Builds [`GeminiClient`]s for a fixed endpoint and model.
pub struct GeminiFactory {
    base_url: Option<String>,
    model: String,
}

impl GeminiFactory {
    pub fn new(base_url: Option<String>, model: String) -> Self {
        Self { base_url, model }
    }
}

impl BackendFactory for GeminiFactory {
    fn build(&self, api_key: String) -> Arc<dyn CompletionBackend> {
        log::info!("completion: using gemini model {}", self.model);
        Arc::new(GeminiClient::new(
            self.base_url.clone(),
            self.model.clone(),
            api_key,
        ))
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate; None when it has no text at all.
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let mut out = String::new();
        let mut any = false;
        for text in parts.iter().filter_map(|p| p.text.as_deref()) {
            out.push_str(text);
            any = true;
        }
        any.then_some(out)
    }
}
