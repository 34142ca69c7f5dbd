//! Gateway HTTP server: relay API, health probes and the Telegram webhook on one port.

use crate::actuator::ActuatorClient;
use crate::channels::{ChannelHandle, ChannelMessage, ChannelRegistry, TelegramChannel, TelegramUpdate};
use crate::command::Command;
use crate::config::{self, Config};
use crate::gateway::protocol::{outcome_to_http, CommandRequest, ErrorResponse, TaskRequest};
use crate::llm::CompletionClient;
use crate::relay::{InboundMessage, Relay, INTERNAL_ERROR_REPLY};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Shared state for the gateway (config, relay, channels).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub relay: Relay,
    /// When Some, /task and /command require `Authorization: Bearer <token>`.
    pub required_token: Option<String>,
    /// In-process channel connector tasks; awaited during graceful shutdown.
    pub channel_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>,
    /// Sender for inbound channel messages (long-poll loop or webhook POSTs). Processor task receives.
    pub inbound_tx: mpsc::Sender<ChannelMessage>,
    pub channel_registry: ChannelRegistry,
    /// Telegram connector, when a bot token is configured.
    pub telegram: Option<Arc<TelegramChannel>>,
}

impl GatewayState {
    /// Register an in-process channel task to be awaited during graceful shutdown.
    pub async fn register_channel_task(&self, handle: JoinHandle<()>) {
        self.channel_tasks.write().await.push(handle);
    }
}

/// Run one relay cycle for a channel message and send the reply (if any) back to the conversation.
async fn process_channel_message(state: GatewayState, msg: ChannelMessage) {
    let Some(reply) = state.relay.handle_isolated(msg.to_relay_message()).await else {
        return;
    };
    match state.channel_registry.get(&msg.channel_id).await {
        Some(handle) => {
            if let Err(e) = handle.send_message(&msg.conversation_id, &reply).await {
                log::warn!("inbound: send_message failed: {}", e);
            }
        }
        None => log::warn!("inbound: no channel registered for {}", msg.channel_id),
    }
}

/// Build the relay from config: allow-list, completion client and actuator client.
pub fn build_relay(config: &Config, config_path: &std::path::Path) -> Result<Relay> {
    let settings = config::resolve_relay_settings(config, config_path)?;
    if settings.allow_list.is_empty() {
        anyhow::bail!(
            "no authorized ids configured (set relay.authorizedIds or COURIER_AUTHORIZED_IDS)"
        );
    }
    log::info!(
        "relay: {} authorized id(s), inference at {}",
        settings.allow_list.len(),
        settings.inference.url
    );
    Ok(Relay::new(
        settings.allow_list,
        Arc::new(CompletionClient::new(settings.inference)),
        Arc::new(ActuatorClient::new(settings.actuator)),
    ))
}

/// HTTP routes over the given state.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/health", get(health_probe))
        .route("/task", post(task_handler))
        .route("/command", post(command_handler))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// When bind is not loopback, a gateway token must be configured or startup fails.
/// Blocks until shutdown (e.g. Ctrl+C).
/// `config_path` is the path to the config file (used to find SYSTEM.md).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    let required_token = config::resolve_gateway_token(&config);
    if !config::is_loopback_bind(&bind) && required_token.is_none() {
        anyhow::bail!(
            "refusing to bind gateway to {} without auth (set gateway.token or COURIER_GATEWAY_TOKEN)",
            bind
        );
    }

    let relay = build_relay(&config, &config_path)?;
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<ChannelMessage>(64);
    let channel_registry = ChannelRegistry::new();

    let telegram = match config::resolve_telegram_token(&config) {
        Some(token) => {
            let telegram = Arc::new(TelegramChannel::new(Some(token)));
            match telegram.fetch_username().await {
                Ok(name) => log::info!("telegram: bot username @{}", name),
                Err(e) => log::warn!("telegram getMe failed, group mentions disabled: {}", e),
            }
            channel_registry.register(telegram.clone()).await;
            Some(telegram)
        }
        None => None,
    };

    let state = GatewayState {
        config: Arc::new(config.clone()),
        relay,
        required_token,
        channel_tasks: Arc::new(tokio::sync::RwLock::new(Vec::new())),
        inbound_tx: inbound_tx.clone(),
        channel_registry: channel_registry.clone(),
        telegram: telegram.clone(),
    };

    {
        let state_inbound = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                tokio::spawn(process_channel_message(state_inbound.clone(), msg));
            }
        });
    }

    let mut telegram_webhook_for_shutdown = None;
    if let Some(ref telegram) = telegram {
        if let Some(ref url) = config.channels.telegram.webhook_url {
            let secret = config.channels.telegram.webhook_secret.as_deref();
            match telegram.set_webhook(url, secret).await {
                Ok(()) => log::info!("telegram channel registered (webhook mode): {}", url),
                Err(e) => log::warn!("telegram set_webhook failed: {}", e),
            }
            telegram_webhook_for_shutdown = Some(telegram.clone());
        } else {
            let handle = telegram.clone().start_inbound(inbound_tx);
            state.register_channel_task(handle).await;
            log::info!("telegram channel registered and getUpdates loop started");
        }
    }

    let channel_tasks = state.channel_tasks.clone();
    let app = router(state);

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            channel_registry,
            channel_tasks,
            telegram_webhook_for_shutdown,
        ))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops channel connectors, removes the Telegram webhook if used, then awaits in-process channel tasks.
async fn shutdown_signal(
    channel_registry: ChannelRegistry,
    channel_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>,
    telegram_webhook: Option<Arc<TelegramChannel>>,
) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping channels");

    channel_registry.stop_all().await;

    if let Some(t) = telegram_webhook {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }

    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for h in handles {
        // The long-poll loop may sit in getUpdates for up to its poll timeout.
        h.abort();
        let _ = h.await;
    }
    log::info!("channel tasks finished");
}

/// Check `Authorization: Bearer <token>` when a gateway token is configured.
fn check_token(state: &GatewayState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(ref expected) = state.required_token else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if provided == expected.as_str() {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("invalid gateway token")),
        )
            .into_response())
    }
}

fn relay_response(outcome: &crate::relay::RelayOutcome) -> Response {
    match outcome_to_http(outcome) {
        (status, Ok(body)) => (status, Json(body)).into_response(),
        (status, Err(body)) => (status, Json(body)).into_response(),
    }
}

/// POST /task: authorize, infer, extract, dispatch; returns the structured result.
async fn task_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(req): Json<TaskRequest>,
) -> Response {
    if let Err(resp) = check_token(&state, &headers) {
        return resp;
    }
    let msg = InboundMessage::new(req.sender_id, req.message);
    match state.relay.process_isolated(msg).await {
        Ok(outcome) => relay_response(&outcome),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(INTERNAL_ERROR_REPLY)),
        )
            .into_response(),
    }
}

/// POST /command: bypass the model and send a command straight to the actuator.
async fn command_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(req): Json<CommandRequest>,
) -> Response {
    if let Err(resp) = check_token(&state, &headers) {
        return resp;
    }
    if !state.relay.is_authorized(&req.sender_id) {
        return (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new("Unauthorized"))).into_response();
    }
    let Some(action) = req.action.filter(|a| !a.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("action is required")),
        )
            .into_response();
    };
    let command = match Command::from_json(json!({ "action": action, "params": req.params })) {
        Ok(c) => c,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    };
    let outcome = state.relay.dispatch_direct(&req.sender_id, command).await;
    relay_response(&outcome)
}

/// POST /telegram/webhook: receives Telegram update JSON; verifies optional secret, pushes a channel message.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(ref telegram) = state.telegram else {
        return StatusCode::NOT_FOUND;
    };
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(ref msg) = update.message else {
        return StatusCode::OK;
    };
    let Some(inbound) = telegram.to_channel_message(msg) else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "channels": state.channel_registry.ids().await,
    }))
}

/// GET /health: gateway liveness plus a probe of the inference server.
async fn health_probe(State(state): State<GatewayState>) -> String {
    let llm = if state.relay.inference_healthy().await {
        "ok"
    } else {
        "unreachable"
    };
    format!("server=ok llm={}", llm)
}
