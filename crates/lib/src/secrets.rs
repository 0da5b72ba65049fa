//! Secrets collaborator: yields the completion API key from a `{"api_key": "..."}` document.
//!
//! The fetch is a single unretried call. Callers treat failure as fatal at startup.

use crate::config::{self, Config, SecretsSource};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("reading secret document {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
    #[error("parsing secret document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("secret document has an empty api_key")]
    EmptyKey,
    #[error("no secret document path configured")]
    NoPath,
}

/// Source of the completion API key.
#[async_trait]
pub trait SecretsProvider: Send + Sync {
    async fn fetch_api_key(&self) -> Result<String, SecretsError>;
}

#[derive(Deserialize)]
struct SecretDocument {
    api_key: String,
}

/// Extract `api_key` from a JSON secret document.
pub fn parse_secret_document(raw: &str) -> Result<String, SecretsError> {
    let doc: SecretDocument = serde_json::from_str(raw)?;
    let key = doc.api_key.trim();
    if key.is_empty() {
        return Err(SecretsError::EmptyKey);
    }
    Ok(key.to_string())
}

/// Reads the secret document from a file.
pub struct FileSecrets {
    path: PathBuf,
}

impl FileSecrets {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SecretsProvider for FileSecrets {
    async fn fetch_api_key(&self) -> Result<String, SecretsError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SecretsError::Read {
                path: self.path.clone(),
                source,
            })?;
        parse_secret_document(&raw)
    }
}

/// Reads the secret from an environment variable. A value starting with `{` is parsed as
/// the JSON document; anything else is taken as the bare key.
pub struct EnvSecrets {
    var: String,
}

impl EnvSecrets {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl SecretsProvider for EnvSecrets {
    async fn fetch_api_key(&self) -> Result<String, SecretsError> {
        let raw = std::env::var(&self.var).map_err(|_| SecretsError::MissingEnv(self.var.clone()))?;
        let raw = raw.trim();
        if raw.starts_with('{') {
            parse_secret_document(raw)
        } else if raw.is_empty() {
            Err(SecretsError::EmptyKey)
        } else {
            Ok(raw.to_string())
        }
    }
}

/// Build the provider selected by `secrets.source`.
pub fn secrets_from_config(config: &Config) -> Result<Arc<dyn SecretsProvider>, SecretsError> {
    match config.secrets.source {
        SecretsSource::Env => Ok(Arc::new(EnvSecrets::new(config.secrets.env_var.clone()))),
        SecretsSource::File => {
            let path = config::resolve_api_key_file(config).ok_or(SecretsError::NoPath)?;
            Ok(Arc::new(FileSecrets::new(path)))
        }
    }
}
