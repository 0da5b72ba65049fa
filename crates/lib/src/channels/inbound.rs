//! Inbound message from a channel, handed to the pipeline once and then dropped.

/// One chat message to be answered in the conversation it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Registered channel that produced the message (e.g. "telegram").
    pub channel_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
}
