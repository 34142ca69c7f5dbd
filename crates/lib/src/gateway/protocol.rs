//! Gateway HTTP wire types for /task and /command.

use crate::actuator::{DispatchOutcome, Route};
use crate::relay::RelayOutcome;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// POST /task body: `{ "senderId": "123", "message": "set an alarm for 7am" }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub message: String,
}

/// POST /command body: `{ "senderId": "123", "action": "set_alarm", "params": { "time": "7:00 AM" } }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One actuator attempt as reported to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub route: Route,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Success body. `action` is "chat" when no command was dispatched.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub ok: bool,
    pub action: String,
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actuator_response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptReport>,
}

/// Error body: `{ "ok": false, "detail": "..." }`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptReport>,
}

impl ErrorResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
            kind: None,
            attempts: Vec::new(),
        }
    }
}

fn attempt_reports(outcome: &DispatchOutcome) -> Vec<AttemptReport> {
    outcome
        .attempts
        .iter()
        .map(|a| AttemptReport {
            route: a.route,
            url: a.url.clone(),
            error: a.error.as_ref().map(ToString::to_string),
        })
        .collect()
}

fn chat(reply: String) -> TaskResponse {
    TaskResponse {
        ok: true,
        action: "chat".to_string(),
        reply,
        params: None,
        route: None,
        actuator_response: None,
        parse_error: None,
        attempts: Vec::new(),
    }
}

/// Map a relay outcome to an HTTP status and body.
pub fn outcome_to_http(outcome: &RelayOutcome) -> (StatusCode, Result<TaskResponse, ErrorResponse>) {
    let reply = outcome.reply_text().unwrap_or_default();
    match outcome {
        RelayOutcome::Rejected => (StatusCode::UNAUTHORIZED, Err(ErrorResponse::new("Unauthorized"))),
        RelayOutcome::EmptyMessage => (
            StatusCode::BAD_REQUEST,
            Err(ErrorResponse::new("message is required")),
        ),
        RelayOutcome::InferenceFailed(e) => (
            StatusCode::BAD_GATEWAY,
            Err(ErrorResponse {
                kind: Some(e.kind().to_string()),
                ..ErrorResponse::new(format!("LLM error: {}", e))
            }),
        ),
        RelayOutcome::EmptyResponse | RelayOutcome::Chat { .. } => (StatusCode::OK, Ok(chat(reply))),
        RelayOutcome::ParseFailed { error, .. } => (
            StatusCode::OK,
            Ok(TaskResponse {
                parse_error: Some(error.to_string()),
                ..chat(reply)
            }),
        ),
        RelayOutcome::Dispatched { command, outcome } => match outcome.succeeded() {
            Some(attempt) => (
                StatusCode::OK,
                Ok(TaskResponse {
                    ok: true,
                    action: command.name.clone(),
                    reply,
                    params: Some(command.arguments.clone()),
                    route: Some(attempt.route),
                    actuator_response: outcome.response.clone(),
                    parse_error: None,
                    attempts: attempt_reports(outcome),
                }),
            ),
            None => (
                StatusCode::BAD_GATEWAY,
                Err(ErrorResponse {
                    kind: Some("dispatch".to_string()),
                    attempts: attempt_reports(outcome),
                    ..ErrorResponse::new(format!(
                        "actuator unreachable: {}",
                        outcome.failure().unwrap_or_default()
                    ))
                }),
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{AttemptError, DispatchAttempt};
    use crate::command::Command;
    use crate::llm::InferenceError;

    #[test]
    fn task_request_accepts_camel_case() {
        let r: TaskRequest =
            serde_json::from_str(r#"{"senderId":"42","message":"hi"}"#).unwrap();
        assert_eq!(r.sender_id, "42");
        assert_eq!(r.message, "hi");
    }

    #[test]
    fn rejected_is_401_without_reply() {
        let (status, body) = outcome_to_http(&RelayOutcome::Rejected);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.unwrap_err().detail, "Unauthorized");
    }

    #[test]
    fn inference_failure_is_502_with_kind() {
        let (status, body) = outcome_to_http(&RelayOutcome::InferenceFailed(InferenceError::Timeout));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.unwrap_err().kind.as_deref(), Some("timeout"));
    }

    #[test]
    fn dispatch_success_reports_route() {
        let outcome = RelayOutcome::Dispatched {
            command: Command::new("lights_on"),
            outcome: DispatchOutcome {
                attempts: vec![
                    DispatchAttempt {
                        route: Route::Lan,
                        url: "http://lan".into(),
                        error: Some(AttemptError::Timeout),
                    },
                    DispatchAttempt {
                        route: Route::Internet,
                        url: "http://wan".into(),
                        error: None,
                    },
                ],
                response: Some(serde_json::json!({"status": "done"})),
            },
        };
        let (status, body) = outcome_to_http(&outcome);
        assert_eq!(status, StatusCode::OK);
        let json = serde_json::to_value(body.unwrap()).unwrap();
        assert_eq!(json["action"], "lights_on");
        assert_eq!(json["route"], "internet");
        assert_eq!(json["actuatorResponse"]["status"], "done");
        assert_eq!(json["attempts"][0]["error"], "timed out");
    }
}
