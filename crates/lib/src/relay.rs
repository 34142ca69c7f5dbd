//! Relay cycle: authorize → infer → extract → dispatch → reply.
//!
//! One [`InboundMessage`] runs through [`Relay::process`] and ends in exactly one
//! [`RelayOutcome`]. Every outcome past authorization renders to a reply; a rejected
//! sender gets none. Nothing is shared between cycles except the immutable allow-list
//! and the backends.

use crate::actuator::{CommandDispatcher, DispatchOutcome};
use crate::auth::AllowList;
use crate::command::{self, Command, ExtractError};
use crate::llm::{InferenceBackend, InferenceError};
use std::sync::Arc;

pub const EMPTY_MESSAGE_REPLY: &str = "Nothing to relay: the message was empty.";
pub const EMPTY_RESPONSE_REPLY: &str = "The model returned an empty response, please try again.";
pub const INTERNAL_ERROR_REPLY: &str =
    "Something went wrong while handling your message. Check the gateway logs for details.";

/// A message from some channel, reduced to what the relay needs.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Raw sender id as the channel reported it.
    pub sender: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }
}

/// Terminal state of one relay cycle.
#[derive(Debug)]
pub enum RelayOutcome {
    /// Sender not on the allow-list. No reply.
    Rejected,
    EmptyMessage,
    InferenceFailed(InferenceError),
    EmptyResponse,
    /// Model answered with prose only.
    Chat { reply: String },
    /// A command marker was present but unusable; the text is still delivered.
    ParseFailed { text: String, error: ExtractError },
    /// A command was sent to the actuator (check `outcome` for success).
    Dispatched {
        command: Command,
        outcome: DispatchOutcome,
    },
}

impl RelayOutcome {
    /// Text to send back to the sender; `None` only for [`RelayOutcome::Rejected`].
    pub fn reply_text(&self) -> Option<String> {
        let text = match self {
            RelayOutcome::Rejected => return None,
            RelayOutcome::EmptyMessage => EMPTY_MESSAGE_REPLY.to_string(),
            RelayOutcome::InferenceFailed(e) => inference_failure_reply(e),
            RelayOutcome::EmptyResponse => EMPTY_RESPONSE_REPLY.to_string(),
            RelayOutcome::Chat { reply } => reply.clone(),
            RelayOutcome::ParseFailed { text, error } => {
                format!("{}\n\n[command parse failed: {}]", text, error)
            }
            RelayOutcome::Dispatched { command, outcome } => dispatch_reply(command, outcome),
        };
        Some(text)
    }
}

fn inference_failure_reply(e: &InferenceError) -> String {
    match e {
        InferenceError::Timeout => {
            "Sorry, the model did not answer in time. Please try again.".to_string()
        }
        InferenceError::Connection(_) => {
            "Sorry, the model server is unreachable right now.".to_string()
        }
        InferenceError::BadStatus { status, .. } => {
            format!("Sorry, the model server returned an error ({}).", status)
        }
        InferenceError::Decode(_) => {
            "Sorry, the model server sent a response I could not read.".to_string()
        }
    }
}

fn dispatch_reply(command: &Command, outcome: &DispatchOutcome) -> String {
    if outcome.attempts.is_empty() {
        return format!(
            "Could not deliver {}: no actuator endpoint is configured.",
            command.name
        );
    }
    let Some(attempt) = outcome.succeeded() else {
        return format!(
            "Could not deliver {} to the actuator. Tried {}",
            command.name,
            outcome.failure().unwrap_or_default()
        );
    };
    let params = serde_json::to_string_pretty(&command.arguments)
        .unwrap_or_else(|_| "{}".to_string());
    let field = |key: &str| {
        outcome
            .response
            .as_ref()
            .and_then(|r| r.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    let status = field("status").unwrap_or_else(|| "done".to_string());
    let reason = field("reason")
        .or_else(|| field("message"))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "Completed: {} (via {})\n```json\n{}\n```\nActuator status: {}\nReason: {}",
        command.name, attempt.route, params, status, reason
    )
}

/// The routing core. Cheap to clone; all state is shared and read-only.
#[derive(Clone)]
pub struct Relay {
    allow_list: Arc<AllowList>,
    inference: Arc<dyn InferenceBackend>,
    dispatcher: Arc<dyn CommandDispatcher>,
}

impl Relay {
    pub fn new(
        allow_list: AllowList,
        inference: Arc<dyn InferenceBackend>,
        dispatcher: Arc<dyn CommandDispatcher>,
    ) -> Self {
        Self {
            allow_list: Arc::new(allow_list),
            inference,
            dispatcher,
        }
    }

    pub fn is_authorized(&self, sender: &str) -> bool {
        self.allow_list.is_authorized(sender)
    }

    /// Whether the inference backend answers its health probe.
    pub async fn inference_healthy(&self) -> bool {
        self.inference.health().await
    }

    /// Run one relay cycle. Authorization is checked before any network I/O.
    pub async fn process(&self, msg: &InboundMessage) -> RelayOutcome {
        if !self.is_authorized(&msg.sender) {
            log::debug!("relay: ignoring message from unauthorized sender");
            return RelayOutcome::Rejected;
        }
        let cycle = cycle_id();
        let text = msg.text.trim();
        if text.is_empty() {
            log::info!("relay[{}]: empty message from {}", cycle, msg.sender);
            return RelayOutcome::EmptyMessage;
        }
        log::info!("relay[{}]: message from {} ({} chars)", cycle, msg.sender, text.len());

        let generated = match self.inference.infer(text).await {
            Ok(t) => t,
            Err(e) => {
                log::warn!("relay[{}]: inference failed ({}): {}", cycle, e.kind(), e);
                return RelayOutcome::InferenceFailed(e);
            }
        };
        if generated.trim().is_empty() {
            log::warn!("relay[{}]: model returned empty text", cycle);
            return RelayOutcome::EmptyResponse;
        }

        match command::extract(&generated) {
            Ok(None) => RelayOutcome::Chat { reply: generated },
            Ok(Some(command)) => {
                log::info!("relay[{}]: dispatching {}", cycle, command.name);
                let outcome = self.dispatcher.dispatch(&command).await;
                RelayOutcome::Dispatched { command, outcome }
            }
            Err(error) => {
                log::warn!("relay[{}]: command parse failed: {}", cycle, error);
                RelayOutcome::ParseFailed {
                    text: generated,
                    error,
                }
            }
        }
    }

    /// Run one cycle and render its reply.
    pub async fn handle(&self, msg: &InboundMessage) -> Option<String> {
        self.process(msg).await.reply_text()
    }

    /// Run one cycle on its own task. `Err` means the cycle panicked.
    pub async fn process_isolated(
        &self,
        msg: InboundMessage,
    ) -> Result<RelayOutcome, tokio::task::JoinError> {
        let relay = self.clone();
        tokio::spawn(async move { relay.process(&msg).await })
            .await
            .map_err(|e| {
                log::error!("relay: cycle aborted: {}", e);
                e
            })
    }

    /// Like [`Relay::handle`], but the cycle runs on its own task so a panic anywhere in
    /// the pipeline still produces a reply for an authorized sender.
    pub async fn handle_isolated(&self, msg: InboundMessage) -> Option<String> {
        if !self.is_authorized(&msg.sender) {
            log::debug!("relay: ignoring message from unauthorized sender");
            return None;
        }
        match self.process_isolated(msg).await {
            Ok(outcome) => outcome.reply_text(),
            Err(_) => Some(INTERNAL_ERROR_REPLY.to_string()),
        }
    }

    /// Skip inference and send `command` straight to the actuator.
    pub async fn dispatch_direct(&self, sender: &str, command: Command) -> RelayOutcome {
        if !self.is_authorized(sender) {
            log::debug!("relay: ignoring direct command from unauthorized sender");
            return RelayOutcome::Rejected;
        }
        log::info!("relay: direct dispatch of {} from {}", command.name, sender);
        let outcome = self.dispatcher.dispatch(&command).await;
        RelayOutcome::Dispatched { command, outcome }
    }
}

fn cycle_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{AttemptError, DispatchAttempt, Route};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    enum Reply {
        Text(&'static str),
        Timeout,
        Panic,
    }

    struct FakeModel {
        reply: Reply,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceBackend for FakeModel {
        async fn infer(&self, _message: &str) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Text(t) => Ok(t.to_string()),
                Reply::Timeout => Err(InferenceError::Timeout),
                Reply::Panic => panic!("model exploded"),
            }
        }
    }

    struct FakeActuator {
        lan_ok: bool,
        seen: Mutex<Vec<Command>>,
    }

    #[async_trait]
    impl CommandDispatcher for FakeActuator {
        async fn dispatch(&self, command: &Command) -> DispatchOutcome {
            self.seen.lock().unwrap().push(command.clone());
            let lan = DispatchAttempt {
                route: Route::Lan,
                url: "http://lan".into(),
                error: (!self.lan_ok).then_some(AttemptError::Timeout),
            };
            let mut attempts = vec![lan];
            if !self.lan_ok {
                attempts.push(DispatchAttempt {
                    route: Route::Internet,
                    url: "http://wan".into(),
                    error: Some(AttemptError::Connection("refused".into())),
                });
            }
            DispatchOutcome {
                attempts,
                response: self
                    .lan_ok
                    .then(|| serde_json::json!({"status": "ok", "reason": "alarm set"})),
            }
        }
    }

    fn relay(reply: Reply, lan_ok: bool) -> (Relay, Arc<FakeModel>, Arc<FakeActuator>) {
        let model = Arc::new(FakeModel {
            reply,
            calls: AtomicUsize::new(0),
        });
        let actuator = Arc::new(FakeActuator {
            lan_ok,
            seen: Mutex::new(Vec::new()),
        });
        let allow = AllowList::from_entries(&["42"]).unwrap();
        (
            Relay::new(allow, model.clone(), actuator.clone()),
            model,
            actuator,
        )
    }

    #[tokio::test]
    async fn unauthorized_sender_touches_nothing() {
        let (relay, model, actuator) = relay(Reply::Text("hi"), true);
        for sender in ["7", "", "abc", "042"] {
            let out = relay.process(&InboundMessage::new(sender, "turn on the lights")).await;
            assert!(matches!(out, RelayOutcome::Rejected));
            assert_eq!(out.reply_text(), None);
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert!(actuator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn plain_reply_is_returned_verbatim() {
        let (relay, model, actuator) = relay(Reply::Text("Sure, doing that now."), true);
        let reply = relay.handle(&InboundMessage::new("42", "turn on the lights")).await;
        assert_eq!(reply.as_deref(), Some("Sure, doing that now."));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert!(actuator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn command_is_dispatched_once() {
        let (relay, _, actuator) = relay(
            Reply::Text(r#"<command>{"action":"set_alarm","params":{"time":"7:00 AM"}}</command>"#),
            true,
        );
        let reply = relay
            .handle(&InboundMessage::new("42", "wake me at 7"))
            .await
            .unwrap();
        assert!(reply.starts_with("Completed: set_alarm (via lan)"));
        assert!(reply.contains("\"time\": \"7:00 AM\""));
        assert!(reply.contains("Actuator status: ok"));
        assert!(reply.contains("Reason: alarm set"));
        let seen = actuator.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].name, "set_alarm");
    }

    #[tokio::test]
    async fn dispatch_failure_names_every_path() {
        let (relay, _, _) = relay(Reply::Text(r#"<command>{"action":"lights_on"}</command>"#), false);
        let reply = relay.handle(&InboundMessage::new("42", "lights")).await.unwrap();
        assert!(reply.starts_with("Could not deliver lights_on to the actuator."));
        assert!(reply.contains("lan (http://lan): timed out"));
        assert!(reply.contains("internet (http://wan): connection failed: refused"));
    }

    #[test]
    fn dispatch_without_endpoints_says_so() {
        let out = RelayOutcome::Dispatched {
            command: Command::new("lights_on"),
            outcome: DispatchOutcome::default(),
        };
        assert_eq!(
            out.reply_text().as_deref(),
            Some("Could not deliver lights_on: no actuator endpoint is configured.")
        );
    }

    #[tokio::test]
    async fn parse_failure_keeps_the_text() {
        let text = r#"Okay <command>{broken</command>"#;
        let (relay, _, actuator) = relay(Reply::Text(text), true);
        let reply = relay.handle(&InboundMessage::new("42", "x")).await.unwrap();
        assert!(reply.starts_with(text));
        assert!(reply.contains("[command parse failed:"));
        assert!(actuator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inference_timeout_is_reported_not_retried() {
        let (relay, model, _) = relay(Reply::Timeout, true);
        let out = relay.process(&InboundMessage::new("42", "hello")).await;
        assert!(matches!(out, RelayOutcome::InferenceFailed(InferenceError::Timeout)));
        assert!(out.reply_text().unwrap().contains("did not answer in time"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_message_and_empty_response() {
        let (relay, model, _) = relay(Reply::Text("   "), true);
        let out = relay.handle(&InboundMessage::new("42", "  \n")).await;
        assert_eq!(out.as_deref(), Some(EMPTY_MESSAGE_REPLY));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        let out = relay.handle(&InboundMessage::new("42", "hi")).await;
        assert_eq!(out.as_deref(), Some(EMPTY_RESPONSE_REPLY));
    }

    #[tokio::test]
    async fn panic_in_cycle_still_replies() {
        let (relay, _, _) = relay(Reply::Panic, true);
        let reply = relay.handle_isolated(InboundMessage::new("42", "hi")).await;
        assert_eq!(reply.as_deref(), Some(INTERNAL_ERROR_REPLY));
        let reply = relay.handle_isolated(InboundMessage::new("9", "hi")).await;
        assert_eq!(reply, None);
        let out = relay.process_isolated(InboundMessage::new("42", "hi")).await;
        assert!(out.unwrap_err().is_panic());
    }

    #[tokio::test]
    async fn direct_dispatch_requires_authorization() {
        let (relay, model, actuator) = relay(Reply::Text("unused"), true);
        let out = relay.dispatch_direct("9", Command::new("get_notifications")).await;
        assert!(matches!(out, RelayOutcome::Rejected));
        let out = relay.dispatch_direct("42", Command::new("get_notifications")).await;
        assert!(matches!(out, RelayOutcome::Dispatched { .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert_eq!(actuator.seen.lock().unwrap().len(), 1);
    }
}
