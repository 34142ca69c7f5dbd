//! Inference backend abstraction and the llama.cpp-style completion client.
//!
//! The relay only needs "prompt in, text out"; [`InferenceBackend`] is that seam so the
//! orchestrator can be driven by a fake in tests.

mod completion;

use async_trait::async_trait;

pub use completion::{
    format_prompt, health_url, CompletionClient, InferenceSettings, SamplingOptions,
    DEFAULT_INFERENCE_URL,
};

/// Why an inference call produced no text. Never retried by the relay.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference timed out")]
    Timeout,
    #[error("inference server unreachable: {0}")]
    Connection(String),
    #[error("inference server returned {status}: {body}")]
    BadStatus { status: u16, body: String },
    #[error("inference response could not be decoded: {0}")]
    Decode(String),
}

impl InferenceError {
    /// Short failure kind for logs and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            InferenceError::Timeout => "timeout",
            InferenceError::Connection(_) => "connection",
            InferenceError::BadStatus { .. } => "bad-status",
            InferenceError::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            InferenceError::Timeout
        } else if e.is_decode() {
            InferenceError::Decode(e.to_string())
        } else {
            InferenceError::Connection(e.to_string())
        }
    }
}

/// Something that turns a user message into generated text.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// One generation for `message`. Implementations apply their own timeout.
    async fn infer(&self, message: &str) -> Result<String, InferenceError>;

    /// Whether the backend answers its health probe. Default: assume up.
    async fn health(&self) -> bool {
        true
    }
}
