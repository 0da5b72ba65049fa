//! Message pipeline: one inbound message in, one ordered delivery (or one fallback notice) out.
//!
//! Each call to [`MessagePipeline::handle`] walks
//! `Idle → Validating → Generating → Chunking → Dispatching → Done`. Generation timeouts and
//! failures divert to `ErrorFallback`, which sends the fixed fallback text as a single message.
//! Send failures during dispatch are logged and never trigger the fallback, so a broken
//! transport cannot loop. Nothing here returns an error to the caller.

use crate::channels::{ChannelRegistry, InboundMessage};
use crate::chunker::{self, Chunk};
use crate::completion::{CompletionClient, CompletionResult};
use crate::config::Config;
use crate::dispatcher::{DeliveryOutcome, OrderedDispatcher};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_FALLBACK_MESSAGE: &str = "Sorry, I encountered an error processing your request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Validating,
    Generating,
    Chunking,
    Dispatching,
    ErrorFallback,
    Done,
}

/// Failure categories used in logs and outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ValidationSkip,
    InitializationFailure,
    GenerationTimeout,
    GenerationFailure,
    DispatchFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ValidationSkip => "validation_skip",
            FailureKind::InitializationFailure => "initialization_failure",
            FailureKind::GenerationTimeout => "generation_timeout",
            FailureKind::GenerationFailure => "generation_failure",
            FailureKind::DispatchFailure => "dispatch_failure",
        };
        f.write_str(s)
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Dropped without sending anything.
    Skipped(FailureKind),
    /// The response was dispatched; outcomes are per chunk.
    Delivered { outcomes: Vec<DeliveryOutcome> },
    /// Generation failed and the fallback notice was dispatched.
    Fallback {
        kind: FailureKind,
        outcome: DeliveryOutcome,
    },
}

/// Per-message knobs, resolved once from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub deadline: Duration,
    pub chunk_threshold: usize,
    pub max_chunk_len: usize,
    pub inter_chunk_delay: Duration,
    pub fallback_message: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            deadline: config.completion.deadline(),
            chunk_threshold: config.delivery.chunk_threshold,
            max_chunk_len: config.delivery.max_chunk_len,
            inter_chunk_delay: config.delivery.inter_chunk_delay(),
            fallback_message: config.delivery.fallback_message.clone(),
        }
    }
}

/// Chunks for a response: split above the threshold, whole otherwise, none when empty.
pub fn plan_chunks(response: &str, chunk_threshold: usize, max_chunk_len: usize) -> Vec<Chunk> {
    if response.is_empty() {
        Vec::new()
    } else if response.chars().count() > chunk_threshold {
        chunker::split(response, max_chunk_len)
    } else {
        Chunk::single(response)
    }
}

pub struct MessagePipeline {
    completion: Arc<CompletionClient>,
    channels: ChannelRegistry,
    settings: PipelineSettings,
}

impl MessagePipeline {
    pub fn new(completion: Arc<CompletionClient>, channels: ChannelRegistry, settings: PipelineSettings) -> Self {
        Self {
            completion,
            channels,
            settings,
        }
    }

    /// Run one message through the pipeline.
    pub async fn handle(&self, msg: InboundMessage) -> PipelineOutcome {
        let mut state = PipelineState::Idle;
        advance(&mut state, PipelineState::Validating, &msg);

        if msg.text.trim().is_empty() {
            log::debug!("pipeline: ignoring empty message in {}", msg.conversation_id);
            return PipelineOutcome::Skipped(FailureKind::ValidationSkip);
        }
        let Some(handle) = self.channels.get(&msg.channel_id).await else {
            log::warn!(
                "pipeline: no channel {} registered, dropping message for {}",
                msg.channel_id,
                msg.conversation_id
            );
            return PipelineOutcome::Skipped(FailureKind::ValidationSkip);
        };
        let dispatcher = OrderedDispatcher::new(handle, self.settings.inter_chunk_delay);

        advance(&mut state, PipelineState::Generating, &msg);
        log::info!(
            "pipeline: processing message: {} chars from {} in {}",
            msg.text.chars().count(),
            msg.sender_id,
            msg.conversation_id
        );
        let response = match self.completion.generate(&msg.text, self.settings.deadline).await {
            CompletionResult::Success(text) => text,
            CompletionResult::TimedOut => {
                log::error!(
                    "pipeline: {}: no response within {:?}",
                    FailureKind::GenerationTimeout,
                    self.settings.deadline
                );
                return self
                    .fallback(&mut state, &msg, &dispatcher, FailureKind::GenerationTimeout)
                    .await;
            }
            CompletionResult::Failed(cause) => {
                let kind = if cause.category == "initialization" {
                    FailureKind::InitializationFailure
                } else {
                    FailureKind::GenerationFailure
                };
                log::error!("pipeline: {} ({}): {}", kind, cause.category, cause.message);
                return self.fallback(&mut state, &msg, &dispatcher, kind).await;
            }
        };

        advance(&mut state, PipelineState::Chunking, &msg);
        let chunks = plan_chunks(
            &response,
            self.settings.chunk_threshold,
            self.settings.max_chunk_len,
        );
        if chunks.is_empty() {
            log::warn!("pipeline: completion was empty, nothing to send to {}", msg.conversation_id);
        }

        advance(&mut state, PipelineState::Dispatching, &msg);
        let outcomes = dispatcher.send_all(&msg.conversation_id, &chunks).await;
        let failed = outcomes.iter().filter(|o| !o.is_sent()).count();
        if failed > 0 {
            log::error!(
                "pipeline: {}: {} of {} chunk(s) to {} not delivered",
                FailureKind::DispatchFailure,
                failed,
                outcomes.len(),
                msg.conversation_id
            );
        }

        advance(&mut state, PipelineState::Done, &msg);
        PipelineOutcome::Delivered { outcomes }
    }

    async fn fallback(
        &self,
        state: &mut PipelineState,
        msg: &InboundMessage,
        dispatcher: &OrderedDispatcher,
        kind: FailureKind,
    ) -> PipelineOutcome {
        advance(state, PipelineState::ErrorFallback, msg);
        let notice = Chunk::single(self.settings.fallback_message.as_str());
        let outcome = dispatcher
            .send_all(&msg.conversation_id, &notice)
            .await
            .pop()
            .unwrap_or(DeliveryOutcome::SendFailed("no outcome".to_string()));
        if let DeliveryOutcome::SendFailed(ref e) = outcome {
            log::error!(
                "pipeline: {}: fallback notice to {} failed: {}",
                FailureKind::DispatchFailure,
                msg.conversation_id,
                e
            );
        }
        advance(state, PipelineState::Done, msg);
        PipelineOutcome::Fallback { kind, outcome }
    }
}

fn advance(state: &mut PipelineState, next: PipelineState, msg: &InboundMessage) {
    log::trace!("pipeline[{}]: {:?} -> {:?}", msg.conversation_id, state, next);
    *state = next;
}
