//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.courier/config.json`) and environment.
//! The relay itself never reads either: [`resolve_relay_settings`] turns them into one
//! immutable [`RelaySettings`] value at startup.

use crate::actuator::{ActuatorEndpoint, ActuatorSettings, Credentials};
use crate::auth::AllowList;
use crate::llm::{InferenceSettings, SamplingOptions, DEFAULT_INFERENCE_URL};
use crate::prompt;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (e.g. Telegram).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Who may use the relay.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Local model endpoint and sampling.
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Actuator endpoints and credentials.
    #[serde(default)]
    pub actuator: ActuatorConfig,
}

/// Gateway bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 15152).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Shared secret for the /task and /command routes. Overridden by COURIER_GATEWAY_TOKEN env.
    /// Required when bind is not loopback.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_gateway_port() -> u16 {
    15152
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            token: None,
        }
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
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Sender ids allowed to use the relay. Overridden by COURIER_AUTHORIZED_IDS (comma-separated).
    #[serde(default)]
    pub authorized_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    /// Completion endpoint. Overridden by COURIER_INFERENCE_URL.
    #[serde(default = "default_inference_url")]
    pub url: String,
    #[serde(default = "default_inference_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_n_predict")]
    pub n_predict: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    #[serde(default = "default_true")]
    pub cache_prompt: bool,
    /// Stop sequences. Defaults to the instruction-template markers.
    #[serde(default = "default_stop")]
    pub stop: Vec<String>,
    /// Inline system prompt. When unset, SYSTEM.md next to the config file is used, then the bundled default.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_inference_url() -> String {
    DEFAULT_INFERENCE_URL.to_string()
}

fn default_inference_timeout_ms() -> u64 {
    120_000
}

fn default_n_predict() -> u32 {
    SamplingOptions::default().n_predict
}

fn default_temperature() -> f32 {
    SamplingOptions::default().temperature
}

fn default_top_k() -> u32 {
    SamplingOptions::default().top_k
}

fn default_top_p() -> f32 {
    SamplingOptions::default().top_p
}

fn default_repeat_penalty() -> f32 {
    SamplingOptions::default().repeat_penalty
}

fn default_true() -> bool {
    true
}

fn default_stop() -> Vec<String> {
    SamplingOptions::default().stop
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let s = SamplingOptions::default();
        Self {
            url: default_inference_url(),
            timeout_ms: default_inference_timeout_ms(),
            n_predict: s.n_predict,
            temperature: s.temperature,
            top_k: s.top_k,
            top_p: s.top_p,
            repeat_penalty: s.repeat_penalty,
            cache_prompt: s.cache_prompt,
            stop: s.stop,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorConfig {
    /// Actuator base URL on the local network (tried first). Overridden by COURIER_ACTUATOR_LAN_URL.
    #[serde(default)]
    pub lan_url: Option<String>,
    #[serde(default = "default_lan_timeout_ms")]
    pub lan_timeout_ms: u64,
    /// Internet-reachable actuator base URL (e.g. a tunnel). Overridden by COURIER_ACTUATOR_URL.
    #[serde(default)]
    pub internet_url: Option<String>,
    #[serde(default = "default_internet_timeout_ms")]
    pub internet_timeout_ms: u64,
    /// Basic-auth user. Overridden by COURIER_ACTUATOR_USER.
    #[serde(default = "default_actuator_user")]
    pub username: String,
    /// Basic-auth password. Overridden by COURIER_ACTUATOR_PASS.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_lan_timeout_ms() -> u64 {
    2_000
}

fn default_internet_timeout_ms() -> u64 {
    15_000
}

fn default_actuator_user() -> String {
    "assistant".to_string()
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            lan_url: None,
            lan_timeout_ms: default_lan_timeout_ms(),
            internet_url: None,
            internet_timeout_ms: default_internet_timeout_ms(),
            username: default_actuator_user(),
            password: None,
        }
    }
}

/// Immutable inputs of the relay core, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub allow_list: AllowList,
    pub inference: InferenceSettings,
    pub actuator: ActuatorSettings,
}

/// Non-empty, trimmed value of an environment variable.
fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| non_empty(&s))
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn config_value(v: Option<&String>) -> Option<String> {
    v.and_then(|s| non_empty(s))
}

/// Resolve the gateway token: env COURIER_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &Config) -> Option<String> {
    env_override("COURIER_GATEWAY_TOKEN").or_else(|| config_value(config.gateway.token.as_ref()))
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    env_override("TELEGRAM_BOT_TOKEN")
        .or_else(|| config_value(config.channels.telegram.bot_token.as_ref()))
}

/// Split a comma-separated id list, dropping blanks.
pub fn parse_id_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve authorized sender ids: env COURIER_AUTHORIZED_IDS overrides config.
pub fn resolve_authorized_ids(config: &Config) -> Vec<String> {
    match env_override("COURIER_AUTHORIZED_IDS") {
        Some(list) => parse_id_list(&list),
        None => config.relay.authorized_ids.clone(),
    }
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Directory holding the config file (and SYSTEM.md).
pub fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

/// Build the relay's immutable settings from config, environment and the config directory.
/// Malformed allow-list entries are an error.
pub fn resolve_relay_settings(config: &Config, config_path: &Path) -> Result<RelaySettings> {
    let ids = resolve_authorized_ids(config);
    let allow_list = AllowList::from_entries(&ids).context("parsing authorized ids")?;

    let inf = &config.inference;
    let system_prompt = config_value(inf.system_prompt.as_ref())
        .or_else(|| prompt::load_system_prompt(&config_dir(config_path)))
        .unwrap_or_else(|| prompt::DEFAULT_SYSTEM_PROMPT.to_string());
    let inference = InferenceSettings {
        url: env_override("COURIER_INFERENCE_URL").unwrap_or_else(|| inf.url.trim().to_string()),
        timeout: Duration::from_millis(inf.timeout_ms),
        sampling: SamplingOptions {
            n_predict: inf.n_predict,
            temperature: inf.temperature,
            top_k: inf.top_k,
            top_p: inf.top_p,
            repeat_penalty: inf.repeat_penalty,
            cache_prompt: inf.cache_prompt,
            stop: inf.stop.clone(),
        },
        system_prompt,
    };

    let act = &config.actuator;
    let lan = env_override("COURIER_ACTUATOR_LAN_URL")
        .or_else(|| config_value(act.lan_url.as_ref()))
        .map(|url| ActuatorEndpoint {
            url,
            timeout: Duration::from_millis(act.lan_timeout_ms),
        });
    let internet = env_override("COURIER_ACTUATOR_URL")
        .or_else(|| config_value(act.internet_url.as_ref()))
        .map(|url| ActuatorEndpoint {
            url,
            timeout: Duration::from_millis(act.internet_timeout_ms),
        });
    if lan.is_none() && internet.is_none() {
        log::warn!("no actuator endpoint configured; commands will not be delivered");
    }
    let actuator = ActuatorSettings {
        lan,
        internet,
        credentials: Credentials {
            username: env_override("COURIER_ACTUATOR_USER")
                .unwrap_or_else(|| act.username.trim().to_string()),
            password: env_override("COURIER_ACTUATOR_PASS")
                .or_else(|| act.password.clone().filter(|p| !p.is_empty())),
        },
    };

    Ok(RelaySettings {
        allow_list,
        inference,
        actuator,
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("COURIER_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".courier").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or COURIER_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
