//! Actuator dispatch: deliver a command over the LAN endpoint, falling back to the
//! internet endpoint.
//!
//! Each configured endpoint gets exactly one attempt per dispatch, LAN first, strictly in
//! sequence. The second attempt only happens when the first one failed, so the actuator
//! never receives the same command twice from one dispatch.

use crate::command::Command;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_LAN_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_INTERNET_TIMEOUT: Duration = Duration::from_secs(15);

/// Which network path an attempt used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Lan,
    Internet,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Lan => write!(f, "lan"),
            Route::Internet => write!(f, "internet"),
        }
    }
}

/// One actuator base URL and how long to wait for it.
#[derive(Debug, Clone)]
pub struct ActuatorEndpoint {
    pub url: String,
    pub timeout: Duration,
}

/// HTTP basic-auth credentials sent with every attempt.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ActuatorSettings {
    pub lan: Option<ActuatorEndpoint>,
    pub internet: Option<ActuatorEndpoint>,
    pub credentials: Credentials,
}

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    #[error("timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("actuator returned {status}: {body}")]
    BadStatus { status: u16, body: String },
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AttemptError::Timeout
        } else {
            AttemptError::Connection(e.to_string())
        }
    }
}

/// Record of one attempt, in the order attempts were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchAttempt {
    pub route: Route,
    pub url: String,
    pub error: Option<AttemptError>,
}

/// Result of one dispatch: the ordered attempts and, on success, the actuator's reply.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub attempts: Vec<DispatchAttempt>,
    pub response: Option<Value>,
}

impl DispatchOutcome {
    pub fn attempted_endpoints(&self) -> Vec<&str> {
        self.attempts.iter().map(|a| a.url.as_str()).collect()
    }

    /// The attempt that delivered the command, if any.
    pub fn succeeded(&self) -> Option<&DispatchAttempt> {
        self.attempts.iter().find(|a| a.error.is_none())
    }

    pub fn succeeded_at(&self) -> Option<&str> {
        self.succeeded().map(|a| a.url.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.succeeded().is_some()
    }

    /// Human-readable failure detail naming every path tried; `None` on success.
    pub fn failure(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        if self.attempts.is_empty() {
            return Some("no actuator endpoint configured".to_string());
        }
        let reasons: Vec<String> = self
            .attempts
            .iter()
            .map(|a| {
                let reason = a
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                format!("{} ({}): {}", a.route, a.url, reason)
            })
            .collect();
        Some(reasons.join("; "))
    }
}

/// Delivers commands to the actuator.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, command: &Command) -> DispatchOutcome;
}

/// reqwest-backed dispatcher for the actuator's `POST /command` API.
#[derive(Clone)]
pub struct ActuatorClient {
    settings: ActuatorSettings,
    client: reqwest::Client,
}

fn command_url(base: &str) -> String {
    format!("{}/command", base.trim_end_matches('/'))
}

impl ActuatorClient {
    pub fn new(settings: ActuatorSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }

    /// Configured endpoints in the order they are tried.
    fn routes(&self) -> Vec<(Route, &ActuatorEndpoint)> {
        let mut out = Vec::with_capacity(2);
        if let Some(ref lan) = self.settings.lan {
            out.push((Route::Lan, lan));
        }
        if let Some(ref internet) = self.settings.internet {
            out.push((Route::Internet, internet));
        }
        out
    }

    async fn post_command(
        &self,
        endpoint: &ActuatorEndpoint,
        command: &Command,
    ) -> Result<Option<Value>, AttemptError> {
        let creds = &self.settings.credentials;
        let mut req = self
            .client
            .post(command_url(&endpoint.url))
            .timeout(endpoint.timeout)
            .json(command);
        if !creds.username.is_empty() {
            req = req.basic_auth(&creds.username, creds.password.as_deref());
        }
        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(AttemptError::BadStatus {
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            });
        }
        // A 2xx status means the actuator accepted the command; a broken body must not
        // turn that into a failure and trigger a second delivery.
        let body = match res.text().await {
            Ok(body) => body,
            Err(e) => {
                log::warn!(
                    "actuator: {} accepted {} but the reply body was unreadable: {}",
                    endpoint.url,
                    command.name,
                    e
                );
                return Ok(None);
            }
        };
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(
            serde_json::from_str(&body).unwrap_or(Value::String(body)),
        ))
    }
}

#[async_trait]
impl CommandDispatcher for ActuatorClient {
    async fn dispatch(&self, command: &Command) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for (route, endpoint) in self.routes() {
            match self.post_command(endpoint, command).await {
                Ok(response) => {
                    log::info!(
                        "actuator: delivered {} via {} ({})",
                        command.name,
                        route,
                        endpoint.url
                    );
                    outcome.attempts.push(DispatchAttempt {
                        route,
                        url: endpoint.url.clone(),
                        error: None,
                    });
                    outcome.response = response;
                    return outcome;
                }
                Err(e) => {
                    log::warn!(
                        "actuator: {} via {} ({}) failed: {}",
                        command.name,
                        route,
                        endpoint.url,
                        e
                    );
                    outcome.attempts.push(DispatchAttempt {
                        route,
                        url: endpoint.url.clone(),
                        error: Some(e),
                    });
                }
            }
        }
        outcome
    }
}
