//! Communication channels (e.g. Telegram).
//!
//! Channel trait and registry so the gateway can start/stop channel connectors
//! and deliver replies. Inbound messages are sent to the gateway, which relays them.

mod inbound;
mod registry;
mod telegram;

pub use inbound::ChannelMessage;
pub use registry::{ChannelError, ChannelHandle, ChannelRegistry};
pub use telegram::{
    strip_mention, truncate_reply, TelegramChannel, TelegramMessage, TelegramUpdate,
    TELEGRAM_MESSAGE_LIMIT,
};
