//! Inbound message from a channel: delivered to the gateway, which runs one relay cycle per message.

use crate::relay::InboundMessage;

/// A message from a channel, with enough addressing to send the reply back.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub channel_id: String,
    /// Where the reply goes (e.g. Telegram chat_id).
    pub conversation_id: String,
    /// Who wrote it (e.g. Telegram user id); checked against the allow-list.
    pub sender_id: String,
    pub text: String,
}

impl ChannelMessage {
    /// The part of the message the relay core sees.
    pub fn to_relay_message(&self) -> InboundMessage {
        InboundMessage::new(self.sender_id.clone(), self.text.clone())
    }
}
