//! Messaging platform side of the relay.
//!
//! Connectors push [`InboundMessage`]s into the gateway and expose a [`ChannelHandle`]
//! so replies can be sent back to the same conversation.

mod inbound;
mod registry;
mod telegram;

pub use inbound::InboundMessage;
pub use registry::{ChannelHandle, ChannelRegistry};
pub use telegram::{parse_updates, TelegramChannel, TelegramUpdate, TELEGRAM_CHANNEL_ID};
