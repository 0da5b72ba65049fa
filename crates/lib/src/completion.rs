//! Completion client: memoized backend handle plus deadline-bounded requests.
//!
//! The backend is built on first use from the secrets provider and reused for the life of
//! the process. `generate` never fails; every outcome is a [`CompletionResult`] variant.
//!
//! The deadline drops the backend future when it fires. For the HTTP backend that cancels the
//! in-flight request, but a backend that spawns detached work keeps running after the timeout.

use crate::config::{self, Config};
use crate::llm::{BackendFactory, CompletionBackend, GeminiFactory, LlmError};
use crate::secrets::{self, SecretsError, SecretsProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

/// One prompt bound to the instant after which its result is no longer wanted.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub deadline: Instant,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            deadline: Instant::now() + timeout,
        }
    }
}

/// Why a completion failed: a short category and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCause {
    pub category: &'static str,
    pub message: String,
}

impl From<&LlmError> for FailureCause {
    fn from(e: &LlmError) -> Self {
        Self {
            category: e.category(),
            message: error_chain(e),
        }
    }
}

/// `err` followed by each distinct source in its chain, joined with ": ".
/// reqwest keeps the transport cause (refused connection, DNS, TLS) out of its own `Display`.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        let text = s.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = s.source();
    }
    message
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionResult {
    Success(String),
    TimedOut,
    Failed(FailureCause),
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("fetching completion api key: {0}")]
    Secrets(#[from] SecretsError),
}

/// Shared handle to the completion backend. Pass it around in an `Arc`.
pub struct CompletionClient {
    secrets: Arc<dyn SecretsProvider>,
    factory: Arc<dyn BackendFactory>,
    backend: OnceCell<Arc<dyn CompletionBackend>>,
}

impl CompletionClient {
    pub fn new(secrets: Arc<dyn SecretsProvider>, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            secrets,
            factory,
            backend: OnceCell::new(),
        }
    }

    /// Client for the Gemini backend described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, InitError> {
        let secrets = secrets::secrets_from_config(config)?;
        let factory = GeminiFactory::new(
            Some(config.completion.base_url.clone()),
            config::resolve_model(config),
        );
        Ok(Self::new(secrets, Arc::new(factory)))
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.initialized()
    }

    /// Fetch the API key and build the backend, once. Concurrent callers wait for the
    /// first one and share its handle. A failed attempt leaves the client uninitialized.
    pub async fn ensure_initialized(&self) -> Result<Arc<dyn CompletionBackend>, InitError> {
        let backend = self
            .backend
            .get_or_try_init(|| async {
                log::info!("completion: fetching api key and building backend");
                let api_key = self.secrets.fetch_api_key().await?;
                Ok::<_, InitError>(self.factory.build(api_key))
            })
            .await?;
        Ok(Arc::clone(backend))
    }

    /// Run one completion, giving up after `timeout`.
    pub async fn generate(&self, prompt: &str, timeout: Duration) -> CompletionResult {
        let backend = match self.ensure_initialized().await {
            Ok(b) => b,
            Err(e) => {
                log::error!("completion: initialization failed: {}", error_chain(&e));
                return CompletionResult::Failed(FailureCause {
                    category: "initialization",
                    message: error_chain(&e),
                });
            }
        };
        let request = CompletionRequest::new(prompt, timeout);
        run_until_deadline(backend.as_ref(), request).await
    }
}

async fn run_until_deadline(backend: &dyn CompletionBackend, request: CompletionRequest) -> CompletionResult {
    let started = Instant::now();
    match tokio::time::timeout_at(request.deadline, backend.generate(&request.prompt)).await {
        Ok(Ok(text)) => {
            log::info!(
                "completion: response generated: {} chars in {:?}",
                text.chars().count(),
                started.elapsed()
            );
            CompletionResult::Success(text)
        }
        Ok(Err(e)) => {
            log::debug!("completion: backend error: {:?}", e);
            CompletionResult::Failed(FailureCause::from(&e))
        }
        Err(_) => CompletionResult::TimedOut,
    }
}
