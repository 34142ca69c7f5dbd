//! Telegram channel: long-poll getUpdates (or webhook) and sendMessage via Bot API.

use crate::channels::inbound::ChannelMessage;
use crate::channels::registry::{ChannelError, ChannelHandle};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;
/// Bot API limit for one text message.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;
const TRUNCATED_SUFFIX: &str = "\n\n[truncated]";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub username: Option<String>,
}

/// Remove every `@username` mention (case-insensitive). Returns None when the bot is not mentioned.
/// A mention must end the username: `@bot` does not match inside `@bot_fan`.
pub fn strip_mention(text: &str, username: &str) -> Option<String> {
    let needle = format!("@{}", username).to_ascii_lowercase();
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut found = false;
    let mut pos = 0;
    let mut copied = 0;
    while let Some(offset) = lower[pos..].find(&needle) {
        let start = pos + offset;
        let end = start + needle.len();
        let at_boundary = lower[end..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
        if at_boundary {
            out.push_str(&text[copied..start]);
            copied = end;
            found = true;
            pos = end;
        } else {
            pos = start + 1;
        }
    }
    if !found {
        return None;
    }
    out.push_str(&text[copied..]);
    Some(out.trim().to_string())
}

/// Fit a reply into one Telegram message; empty replies become a placeholder.
/// `limit` is in UTF-16 code units, which is how the Bot API measures text.
pub fn truncate_reply(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "No response".to_string();
    }
    if text.encode_utf16().count() <= limit {
        return text.to_string();
    }
    let budget = limit.saturating_sub(TRUNCATED_SUFFIX.encode_utf16().count());
    let mut used = 0;
    let mut out = String::new();
    for c in text.chars() {
        used += c.len_utf16();
        if used > budget {
            break;
        }
        out.push(c);
    }
    out.push_str(TRUNCATED_SUFFIX);
    out
}

/// Telegram channel connector: long-polls for updates and sends replies via sendMessage.
pub struct TelegramChannel {
    id: String,
    token: Option<String>,
    api_base: String,
    /// Bot username from getMe; needed to recognise mentions in group chats.
    username: OnceLock<String>,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: Option<String>) -> Self {
        Self::with_api_base(token, telegram_api_base())
    }

    /// Same as [`TelegramChannel::new`] against a custom Bot API base URL.
    pub fn with_api_base(token: Option<String>, api_base: impl Into<String>) -> Self {
        Self {
            id: "telegram".to_string(),
            token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            username: OnceLock::new(),
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn method_url(&self, method: &str) -> Result<String, ChannelError> {
        let token = self
            .token
            .as_ref()
            .ok_or(ChannelError::NotConfigured("telegram bot token"))?;
        Ok(format!("{}/bot{}/{}", self.api_base, token, method))
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Option<T>, ChannelError> {
        let url = self.method_url(method)?;
        let req = match body {
            Some(b) => self.client.post(&url).json(&b),
            None => self.client.get(&url),
        };
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!("{} failed: {} {}", method, status, body)));
        }
        let data: ApiResponse<T> = res.json().await?;
        if !data.ok {
            return Err(ChannelError::Api(format!(
                "{} returned ok: false ({})",
                method,
                data.description.unwrap_or_default()
            )));
        }
        Ok(data.result)
    }

    /// Look up the bot's username via getMe and remember it.
    pub async fn fetch_username(&self) -> Result<String, ChannelError> {
        if let Some(name) = self.username.get() {
            return Ok(name.clone());
        }
        let me: Option<TelegramUser> = self.call("getMe", None).await?;
        let name = me
            .and_then(|u| u.username)
            .ok_or_else(|| ChannelError::Api("getMe returned no username".to_string()))?;
        Ok(self.username.get_or_init(|| name).clone())
    }

    /// Turn a Telegram message into a channel message, or None when it should be ignored:
    /// no text, sent by a bot, or a group message that does not mention this bot.
    pub fn to_channel_message(&self, msg: &TelegramMessage) -> Option<ChannelMessage> {
        let text = msg.text.as_ref()?;
        let from = msg.from.as_ref()?;
        if from.is_bot {
            return None;
        }
        let text = if msg.chat.kind == "private" || msg.chat.kind.is_empty() {
            text.trim().to_string()
        } else {
            let username = self.username.get()?;
            strip_mention(text, username)?
        };
        if text.is_empty() {
            return None;
        }
        Some(ChannelMessage {
            channel_id: self.id.clone(),
            conversation_id: msg.chat.id.to_string(),
            sender_id: from.id.to_string(),
            text,
        })
    }

    /// Start the getUpdates long-poll loop and forward messages to the gateway. Returns a handle to await on shutdown.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<ChannelMessage>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), ChannelError> {
        let mut body = serde_json::json!({ "timeout": LONG_POLL_TIMEOUT });
        if let Some(off) = offset {
            body["offset"] = serde_json::Value::from(off);
        }
        let updates: Vec<TelegramUpdate> =
            self.call("getUpdates", Some(body)).await?.unwrap_or_default();
        let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
        Ok((updates, next_offset))
    }

    /// Set webhook URL (and optional secret). When set, Telegram POSTs updates to the URL instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({ "url": url });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        self.call::<serde_json::Value>("setWebhook", Some(body)).await?;
        Ok(())
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), ChannelError> {
        self.call::<serde_json::Value>("deleteWebhook", Some(serde_json::json!({})))
            .await?;
        Ok(())
    }

    /// Send a text message to a chat via sendMessage, truncated to the Bot API limit.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": truncate_reply(text, TELEGRAM_MESSAGE_LIMIT),
        });
        self.call::<serde_json::Value>("sendMessage", Some(body)).await?;
        Ok(())
    }
}

async fn run_get_updates_loop(channel: Arc<TelegramChannel>, inbound_tx: mpsc::Sender<ChannelMessage>) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                offset = next.or(offset);
                for u in updates {
                    let Some(ref msg) = u.message else { continue };
                    let Some(inbound) = channel.to_channel_message(msg) else {
                        continue;
                    };
                    if inbound_tx.send(inbound).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl ChannelHandle for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        TelegramChannel::send_message(self, conversation_id, text).await
    }
}

/// Resolve Telegram bot API base URL: env TELEGRAM_API_BASE overrides the public endpoint.
pub fn telegram_api_base() -> String {
    std::env::var("TELEGRAM_API_BASE").unwrap_or_else(|_| TELEGRAM_API_BASE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(chat_kind: &str, from_bot: bool, text: &str) -> TelegramMessage {
        serde_json::from_value(serde_json::json!({
            "chat": { "id": -100, "type": chat_kind },
            "from": { "id": 42, "is_bot": from_bot },
            "text": text,
        }))
        .unwrap()
    }

    #[test]
    fn strip_mention_removes_every_occurrence() {
        assert_eq!(
            strip_mention("@PhoneBot set an alarm @phonebot", "phonebot").as_deref(),
            Some("set an alarm")
        );
        assert_eq!(strip_mention("set an alarm", "phonebot"), None);
    }

    #[test]
    fn strip_mention_ignores_longer_usernames() {
        assert_eq!(strip_mention("@phonebot_fan hello", "phonebot"), None);
        assert_eq!(strip_mention("@phonebot2 hi", "phonebot"), None);
        assert_eq!(
            strip_mention("@phonebot_fan ask @PhoneBot, please", "phonebot").as_deref(),
            Some("@phonebot_fan ask , please")
        );
    }

    #[test]
    fn truncate_reply_respects_limit() {
        assert_eq!(truncate_reply("  ", 10), "No response");
        assert_eq!(truncate_reply("short", 10), "short");
        let long = "x".repeat(50);
        let out = truncate_reply(&long, 30);
        assert_eq!(out.chars().count(), 30);
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn truncate_reply_counts_utf16_units() {
        let out = truncate_reply(&"😀".repeat(5000), TELEGRAM_MESSAGE_LIMIT);
        assert!(out.encode_utf16().count() <= TELEGRAM_MESSAGE_LIMIT);
        assert!(out.ends_with("[truncated]"));
        assert!(out.starts_with("😀😀"));
        // Exactly at the limit in UTF-16 units: kept whole.
        let fits = "😀".repeat(TELEGRAM_MESSAGE_LIMIT / 2);
        assert_eq!(truncate_reply(&fits, TELEGRAM_MESSAGE_LIMIT), fits);
    }

    #[test]
    fn private_messages_are_relayed_with_sender() {
        let channel = TelegramChannel::with_api_base(Some("t".into()), "http://unused");
        let msg = channel.to_channel_message(&message("private", false, " hi ")).unwrap();
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.conversation_id, "-100");
        assert_eq!(msg.text, "hi");
    }

    #[test]
    fn bots_and_unmentioned_group_messages_are_ignored() {
        let channel = TelegramChannel::with_api_base(Some("t".into()), "http://unused");
        assert!(channel.to_channel_message(&message("private", true, "hi")).is_none());
        // Username unknown: group messages cannot be attributed to this bot.
        assert!(channel.to_channel_message(&message("group", false, "@phonebot hi")).is_none());
        channel.username.get_or_init(|| "phonebot".to_string());
        assert!(channel.to_channel_message(&message("group", false, "hi")).is_none());
        let msg = channel
            .to_channel_message(&message("group", false, "@phonebot hi"))
            .unwrap();
        assert_eq!(msg.text, "hi");
    }
}
