//! Completion backend abstraction and the Gemini client.
//!
//! The pipeline only sees [`CompletionBackend`]; a [`BackendFactory`] turns the API key
//! fetched at initialization into a concrete backend.

mod gemini;

pub use gemini::{GeminiClient, GeminiFactory};

use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("completion api error: {0}")]
    Api(String),
    #[error("completion returned no text")]
    EmptyResponse,
}

impl LlmError {
    /// Short category for logs and failure reports.
    pub fn category(&self) -> &'static str {
        match self {
            LlmError::Request(_) => "request",
            LlmError::Api(_) => "api",
            LlmError::EmptyResponse => "empty_response",
        }
    }
}

/// One prompt in, one completion out.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Builds a backend handle from a credential.
pub trait BackendFactory: Send + Sync {
    fn build(&self, api_key: String) -> Arc<dyn CompletionBackend>;
}
