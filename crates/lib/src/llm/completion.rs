//! Completion client for a local llama.cpp server (`POST /completion`).
//! Also understands proxies that answer with `response` or OpenAI-style `choices[].text`.

use crate::llm::{InferenceBackend, InferenceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_INFERENCE_URL: &str = "http://localhost:8080/completion";

const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Sampling parameters forwarded to the completion endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingOptions {
    pub n_predict: u32,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub cache_prompt: bool,
    pub stop: Vec<String>,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            n_predict: 80,
            temperature: 0.1,
            top_k: 10,
            top_p: 0.9,
            repeat_penalty: 1.1,
            cache_prompt: true,
            stop: default_stop_words(),
        }
    }
}

pub(crate) fn default_stop_words() -> Vec<String> {
    ["### User:", "\n###", "Here's", "Sure,", "possible", "implementation", "Example"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Everything the client needs; resolved once from config.
#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub url: String,
    pub timeout: Duration,
    pub sampling: SamplingOptions,
    pub system_prompt: String,
}

/// Client for the completion endpoint. Cheap to clone; shares one HTTP client.
#[derive(Clone)]
pub struct CompletionClient {
    settings: InferenceSettings,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: String,
    n_predict: u32,
    temperature: f32,
    top_k: u32,
    top_p: f32,
    repeat_penalty: f32,
    cache_prompt: bool,
    stop: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    choices: Option<Vec<CompletionChoice>>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: Option<String>,
}

impl CompletionResponse {
    /// First non-empty of `content`, `response`, `choices[0].text`.
    fn text(self) -> String {
        let choice = self
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.text);
        [self.content, self.response, choice]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }
}

/// Wrap a user message in the instruction template the local model expects.
pub fn format_prompt(system: &str, message: &str) -> String {
    format!(
        "### System:\n{}\n\n### User:\n{}\n\n### Assistant:\n",
        system.trim(),
        message
    )
}

/// Health probe URL: the completion URL with its last path segment replaced by `health`.
pub fn health_url(completion_url: &str) -> String {
    let trimmed = completion_url.trim_end_matches('/');
    match trimmed.strip_suffix("/completion") {
        Some(base) => format!("{}/health", base),
        None => format!("{}/health", trimmed),
    }
}

impl CompletionClient {
    pub fn new(settings: InferenceSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.settings.url
    }

    fn system_context(&self) -> String {
        let today = chrono::Local::now().format("%Y-%m-%d");
        format!("Today's date: {}\n\n{}", today, self.settings.system_prompt.trim())
    }

    /// POST the templated prompt and return the generated text, trimmed.
    pub async fn complete(&self, message: &str) -> Result<String, InferenceError> {
        let sampling = &self.settings.sampling;
        let body = CompletionRequest {
            prompt: format_prompt(&self.system_context(), message),
            n_predict: sampling.n_predict,
            temperature: sampling.temperature,
            top_k: sampling.top_k,
            top_p: sampling.top_p,
            repeat_penalty: sampling.repeat_penalty,
            cache_prompt: sampling.cache_prompt,
            stop: &sampling.stop,
        };
        let res = self
            .client
            .post(&self.settings.url)
            .timeout(self.settings.timeout)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(InferenceError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }
        let data: CompletionResponse = res.json().await?;
        let text = data.text().trim().to_string();
        log::debug!(
            "llm: url={} len={} preview={:?}",
            self.settings.url,
            text.len(),
            text.chars().take(120).collect::<String>()
        );
        Ok(text)
    }

    /// GET the server's /health endpoint with a short timeout.
    pub async fn check_health(&self) -> bool {
        let url = health_url(&self.settings.url);
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(res) => res.status().is_success(),
            Err(e) => {
                log::debug!("llm health check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for CompletionClient {
    async fn infer(&self, message: &str) -> Result<String, InferenceError> {
        self.complete(message).await
    }

    async fn health(&self) -> bool {
        self.check_health().await
    }
}
