//! Client for the inference relay.
//!
//! All model calls (translation scoring, transcription, note suggestions,
//! smart completion) go through one relay URL. The request body carries an
//! `endpoint` discriminator; prompts and rubrics live on the relay side.
//!
//! # Retry Strategy
//!
//! Every call is wrapped in [`retry_with_backoff`]:
//! - transport errors, timeouts, HTTP 429 and 5xx, malformed bodies → retry
//! - other HTTP 4xx → fail immediately
//! - delay before retry `n` (0-based) is `base_delay * 2^n`

use base64::Engine;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::InferenceConfig;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("relay returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("relay request failed: {0}")]
    Transport(String),
    #[error("relay request timed out")]
    Timeout,
    #[error("malformed relay response: {0}")]
    Malformed(String),
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::Status { status, .. } => *status == 429 || *status >= 500,
            InferenceError::Transport(_) | InferenceError::Timeout | InferenceError::Malformed(_) => {
                true
            }
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            InferenceError::Timeout
        } else {
            InferenceError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. Returns the last error in the latter case.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, InferenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InferenceError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_retryable() || attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    call = what,
                    error = %e,
                    retry = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "inference call failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Body posted to the relay.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "endpoint")]
pub enum RelayRequest<'a> {
    #[serde(rename = "chat")]
    Chat {
        original: &'a str,
        translation: &'a str,
    },
    #[serde(rename = "transcription")]
    Transcription {
        /// Base64 audio, no data-URL prefix.
        audio: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt: Option<&'a str>,
    },
    #[serde(rename = "noteSuggestions", rename_all = "camelCase")]
    NoteSuggestions {
        original_text: &'a str,
        translation_text: &'a str,
        ai_check_result: &'a str,
        current_note_text: &'a str,
    },
    #[serde(rename = "smartCompletion", rename_all = "camelCase")]
    SmartCompletion {
        original_text: &'a str,
        translation_text: &'a str,
        ai_check_result: &'a str,
        current_input: &'a str,
    },
}

impl RelayRequest<'_> {
    fn name(&self) -> &'static str {
        match self {
            RelayRequest::Chat { .. } => "chat",
            RelayRequest::Transcription { .. } => "transcription",
            RelayRequest::NoteSuggestions { .. } => "noteSuggestions",
            RelayRequest::SmartCompletion { .. } => "smartCompletion",
        }
    }

    fn answer_field(&self) -> Answer {
        match self {
            RelayRequest::Transcription { .. } => Answer::Text,
            _ => Answer::ChatContent,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Answer {
    /// `choices[0].message.content`
    ChatContent,
    /// `text`
    Text,
}

fn extract_answer(json: &serde_json::Value, answer: Answer) -> Result<String, InferenceError> {
    let value = match answer {
        Answer::ChatContent => json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content")),
        Answer::Text => json.get("text"),
    };
    value
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            let field = match answer {
                Answer::ChatContent => "choices[0].message.content",
                Answer::Text => "text",
            };
            InferenceError::Malformed(format!("missing {}", field))
        })
}

/// HTTP client for the relay.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    client: reqwest::Client,
    relay_url: String,
    policy: RetryPolicy,
}

impl InferenceClient {
    pub fn new(relay_url: impl Into<String>, policy: RetryPolicy, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            relay_url: relay_url.into(),
            policy,
        })
    }

    pub fn from_config(config: &InferenceConfig) -> anyhow::Result<Self> {
        Self::new(
            config.relay_url.clone(),
            RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.base_delay_ms),
            },
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Score a translation against its original.
    pub async fn check_translation(
        &self,
        original: &str,
        translation: &str,
    ) -> Result<String, InferenceError> {
        self.call(&RelayRequest::Chat {
            original,
            translation,
        })
        .await
    }

    /// Transcribe raw audio bytes.
    pub async fn transcribe_audio(
        &self,
        audio: &[u8],
        language: Option<&str>,
        prompt: Option<&str>,
    ) -> Result<String, InferenceError> {
        let audio = base64::engine::general_purpose::STANDARD.encode(audio);
        self.call(&RelayRequest::Transcription {
            audio,
            language,
            prompt,
        })
        .await
    }

    pub async fn note_suggestions(
        &self,
        original_text: &str,
        translation_text: &str,
        ai_check_result: &str,
        current_note_text: &str,
    ) -> Result<String, InferenceError> {
        self.call(&RelayRequest::NoteSuggestions {
            original_text,
            translation_text,
            ai_check_result,
            current_note_text,
        })
        .await
    }

    pub async fn smart_completion(
        &self,
        original_text: &str,
        translation_text: &str,
        ai_check_result: &str,
        current_input: &str,
    ) -> Result<String, InferenceError> {
        self.call(&RelayRequest::SmartCompletion {
            original_text,
            translation_text,
            ai_check_result,
            current_input,
        })
        .await
    }

    async fn call(&self, request: &RelayRequest<'_>) -> Result<String, InferenceError> {
        let name = request.name();
        let answer = request.answer_field();
        retry_with_backoff(&self.policy, name, move || async move {
            debug!(endpoint = name, "posting to inference relay");
            let response = self.client.post(&self.relay_url).json(request).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(InferenceError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| InferenceError::Malformed(e.to_string()))?;
            extract_answer(&json, answer)
        })
        .await
    }
}
