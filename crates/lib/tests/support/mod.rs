//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use relay::channels::ChannelHandle;
use relay::completion::CompletionClient;
use relay::llm::{BackendFactory, CompletionBackend, LlmError};
use relay::secrets::{SecretsError, SecretsProvider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct StaticSecrets {
    pub fetches: AtomicUsize,
}

#[async_trait]
impl SecretsProvider for StaticSecrets {
    async fn fetch_api_key(&self) -> Result<String, SecretsError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok("test-key".to_string())
    }
}

#[derive(Clone)]
pub enum Script {
    /// Reply with this exact text.
    Reply(String),
    /// Reply with "echo: " followed by the prompt.
    Echo,
    Fail,
    Hang,
}

struct ScriptedBackend(Script);

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        match &self.0 {
            Script::Reply(text) => Ok(text.clone()),
            Script::Echo => Ok(format!("echo: {}", prompt)),
            Script::Fail => Err(LlmError::Api("503 Service Unavailable".to_string())),
            Script::Hang => std::future::pending().await,
        }
    }
}

pub struct ScriptedFactory {
    pub script: Script,
    pub builds: AtomicUsize,
}

impl BackendFactory for ScriptedFactory {
    fn build(&self, _api_key: String) -> Arc<dyn CompletionBackend> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Arc::new(ScriptedBackend(self.script.clone()))
    }
}

/// A completion client over a scripted backend, plus its counters.
pub fn scripted_client(script: Script) -> (Arc<CompletionClient>, Arc<StaticSecrets>, Arc<ScriptedFactory>) {
    let secrets = Arc::new(StaticSecrets {
        fetches: AtomicUsize::new(0),
    });
    let factory = Arc::new(ScriptedFactory {
        script,
        builds: AtomicUsize::new(0),
    });
    let client = Arc::new(CompletionClient::new(secrets.clone(), factory.clone()));
    (client, secrets, factory)
}

/// Channel that records every send. Sends whose 1-based position is in `fail_at` fail.
pub struct RecordingChannel {
    id: String,
    sends: Mutex<Vec<(String, String)>>,
    attempts: AtomicUsize,
    fail_at: Vec<usize>,
}

impl RecordingChannel {
    pub fn new(id: &str) -> Arc<Self> {
        Self::failing_at(id, vec![])
    }

    pub fn failing_at(id: &str, fail_at: Vec<usize>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            sends: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail_at,
        })
    }

    /// (conversation_id, text) for every attempted send, in order.
    pub fn sends(&self) -> Vec<(String, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sends().into_iter().map(|(_, t)| t).collect()
    }
}

#[async_trait]
impl ChannelHandle for RecordingChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {}

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.sends
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), text.to_string()));
        tokio::time::sleep(Duration::from_millis(1)).await;
        if self.fail_at.contains(&n) {
            Err(format!("send {} rejected", n))
        } else {
            Ok(())
        }
    }
}

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}
