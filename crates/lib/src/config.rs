//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and environment.
//! Every field has a default, so a missing file or `{}` yields a runnable config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Health/webhook HTTP server and shutdown settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (e.g. Telegram).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Completion backend (model, endpoint, deadline).
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Where the completion API key comes from.
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Outbound chunking, pacing, and fallback text.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the health endpoint and Telegram webhook (default 15152).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// How long shutdown waits for in-flight messages before aborting them.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_gateway_port() -> u16 {
    15152
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl GatewayConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Per-channel config (e.g. Telegram bot token).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// When set, use webhook mode: Telegram POSTs updates to this URL. If unset, long-poll getUpdates is used.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token). Used only when webhook_url is set.
    pub webhook_secret: Option<String>,
    /// Bot API base URL override (tests, self-hosted Bot API servers).
    pub api_base: Option<String>,
}

/// Completion backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionConfig {
    /// Gemini model name (default "gemini-2.5-flash"). Overridden by RELAY_COMPLETION_MODEL.
    #[serde(default = "default_model")]
    pub model: String,

    /// API base URL (default https://generativelanguage.googleapis.com).
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,

    /// Per-message deadline for the completion call. Deployments use 30000 to 120000.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_completion_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_deadline_ms() -> u64 {
    30_000
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_completion_base_url(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

impl CompletionConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Where the secret document (`{"api_key": "..."}`) is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretsSource {
    /// Environment variable holding the JSON document or the bare key.
    #[default]
    Env,

    /// JSON document on disk.
    File,
}

/// Secrets collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretsConfig {
    #[serde(default)]
    pub source: SecretsSource,

    /// Path to the secret document when source is "file". Overridden by RELAY_API_KEY_FILE.
    pub path: Option<PathBuf>,

    /// Variable name when source is "env" (default GEMINI_API_KEY).
    #[serde(default = "default_secrets_env_var")]
    pub env_var: String,
}

fn default_secrets_env_var() -> String {
    "GEMINI_API_KEY".to_string()
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            source: SecretsSource::default(),
            path: None,
            env_var: default_secrets_env_var(),
        }
    }
}

/// Outbound delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryConfig {
    /// Responses longer than this many characters are chunked.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,

    /// Maximum characters per chunk.
    #[serde(default = "default_max_chunk_len")]
    pub max_chunk_len: usize,

    /// Pause between consecutive chunk sends.
    #[serde(default = "default_inter_chunk_delay_ms")]
    pub inter_chunk_delay_ms: u64,

    /// Text sent when generation fails or times out.
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

fn default_chunk_threshold() -> usize {
    1000
}

fn default_max_chunk_len() -> usize {
    1000
}

fn default_inter_chunk_delay_ms() -> u64 {
    100
}

fn default_fallback_message() -> String {
    crate::pipeline::DEFAULT_FALLBACK_MESSAGE.to_string()
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: default_chunk_threshold(),
            max_chunk_len: default_max_chunk_len(),
            inter_chunk_delay_ms: default_inter_chunk_delay_ms(),
            fallback_message: default_fallback_message(),
        }
    }
}

impl DeliveryConfig {
    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }
}

impl Config {
    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.delivery.max_chunk_len == 0 {
            anyhow::bail!("delivery.maxChunkLen must be greater than 0");
        }
        if self.delivery.chunk_threshold > self.delivery.max_chunk_len {
            anyhow::bail!(
                "delivery.chunkThreshold ({}) must not exceed delivery.maxChunkLen ({})",
                self.delivery.chunk_threshold,
                self.delivery.max_chunk_len
            );
        }
        if self.completion.deadline_ms == 0 {
            anyhow::bail!("completion.deadlineMs must be greater than 0");
        }
        if self.delivery.fallback_message.trim().is_empty() {
            anyhow::bail!("delivery.fallbackMessage must not be empty");
        }
        if self.secrets.source == SecretsSource::File && resolve_api_key_file(self).is_none() {
            anyhow::bail!("secrets.source is \"file\" but no secrets.path or RELAY_API_KEY_FILE is set");
        }
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    non_empty_env("TELEGRAM_BOT_TOKEN").or_else(|| {
        config
            .channels
            .telegram
            .bot_token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the completion model: env RELAY_COMPLETION_MODEL overrides config.
pub fn resolve_model(config: &Config) -> String {
    non_empty_env("RELAY_COMPLETION_MODEL").unwrap_or_else(|| {
        let m = config.completion.model.trim();
        if m.is_empty() {
            default_model()
        } else {
            m.to_string()
        }
    })
}

/// Resolve the secret document path: env RELAY_API_KEY_FILE overrides config.
pub fn resolve_api_key_file(config: &Config) -> Option<PathBuf> {
    non_empty_env("RELAY_API_KEY_FILE")
        .map(PathBuf::from)
        .or_else(|| config.secrets.path.clone())
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or RELAY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config: Config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    config
        .validate()
        .with_context(|| format!("invalid config in {}", path.display()))?;
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.gateway.port, 15152);
        assert_eq!(config.gateway.bind, "127.0.0.1");
        assert_eq!(config.completion.deadline_ms, 30_000);
        assert_eq!(config.delivery.chunk_threshold, 1000);
        assert_eq!(config.delivery.max_chunk_len, 1000);
        assert_eq!(config.delivery.inter_chunk_delay(), Duration::from_millis(100));
        assert_eq!(
            config.delivery.fallback_message,
            "Sorry, I encountered an error processing your request."
        );
        assert_eq!(config.secrets.source, SecretsSource::Env);
        assert_eq!(config.secrets.env_var, "GEMINI_API_KEY");
    }

    #[test]
    fn camel_case_fields_are_read() {
        let raw = r#"{
            "completion": { "deadlineMs": 120000, "model": "gemini-1.5-flash" },
            "delivery": { "maxChunkLen": 400, "interChunkDelayMs": 0 },
            "secrets": { "source": "file", "path": "/run/secrets/gemini.json" }
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.completion.deadline(), Duration::from_secs(120));
        assert_eq!(config.completion.model, "gemini-1.5-flash");
        assert_eq!(config.delivery.max_chunk_len, 400);
        assert_eq!(config.delivery.chunk_threshold, 1000);
        assert_eq!(config.secrets.source, SecretsSource::File);
        assert_eq!(
            config.secrets.path,
            Some(PathBuf::from("/run/secrets/gemini.json"))
        );
    }

    #[test]
    fn validate_rejects_zero_chunk_len() {
        let mut config = Config::default();
        config.delivery.max_chunk_len = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_threshold_above_max_chunk_len() {
        let mut config = Config::default();
        config.delivery.max_chunk_len = 400;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chunkThreshold"));

        config.delivery.chunk_threshold = 400;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_fallback() {
        let mut config = Config::default();
        config.delivery.fallback_message = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("relay-config-does-not-exist.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.gateway.port, 15152);
    }

    #[test]
    fn loopback_detection() {
        assert!(is_loopback_bind("127.0.0.1"));
        assert!(is_loopback_bind(" localhost "));
        assert!(!is_loopback_bind("0.0.0.0"));
    }
}
