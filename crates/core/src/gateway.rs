//! Single choke-point to the text-generation service.
//!
//! Every call in the pipeline goes through an [`InferenceGateway`]. The HTTP
//! implementation speaks the Anthropic Messages API; retries are limited to the
//! service's overload signal and are driven by [`with_retry`].

use crate::error::GatewayError;
use crate::models::ModelTier;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

const OVERLOADED_STATUS: u16 = 529;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Base delay doubling per attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    /// Equal jitter: `base/2 + random(0, base/2)`.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let half = self.base_delay(attempt).as_secs_f64() / 2.0;
        Duration::from_secs_f64(half + rng.gen_range(0.0..=half))
    }
}

/// Runs `operation` until it succeeds, fails with something other than an
/// overload signal, or `policy.max_attempts` overload signals have been seen.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let attempts = policy.max_attempts.max(1);

    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_overload_signal() => {
                if attempt + 1 < attempts {
                    let wait = policy.delay_for(attempt, &mut rand::thread_rng());
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        wait_secs = wait.as_secs_f64(),
                        "inference service overloaded, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
            Err(error) => return Err(error),
        }
    }

    Err(GatewayError::Overloaded { attempts })
}

#[derive(Debug, Clone)]
pub enum MessageContent {
    Text(String),
    /// A PDF attached natively, followed by a text instruction.
    Document { pdf_base64: String, text: String },
}

impl MessageContent {
    pub fn document(pdf: &[u8], text: impl Into<String>) -> Self {
        MessageContent::Document {
            pdf_base64: STANDARD.encode(pdf),
            text: text.into(),
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, MessageContent::Document { .. })
    }

    fn to_json(&self) -> Value {
        match self {
            MessageContent::Text(text) => Value::String(text.clone()),
            MessageContent::Document { pdf_base64, text } => json!([
                {
                    "type": "document",
                    "source": {
                        "type": "base64",
                        "media_type": "application/pdf",
                        "data": pdf_base64,
                    }
                },
                { "type": "text", "text": text }
            ]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub system: String,
    pub content: MessageContent,
    pub model: ModelTier,
    pub max_tokens: u32,
}

impl InferenceRequest {
    pub fn text(system: impl Into<String>, user: impl Into<String>, model: ModelTier) -> Self {
        Self {
            system: system.into(),
            content: MessageContent::Text(user.into()),
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Model actually sent upstream: native-document calls never run on the
    /// cheapest tier; explicit higher tiers are honoured.
    pub fn effective_model(&self) -> ModelTier {
        if self.content.is_document() {
            self.model.for_document_vision()
        } else {
            self.model
        }
    }
}

#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// Raw text of the single response block; empty when there is none.
    async fn complete(&self, request: &InferenceRequest) -> Result<String, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct AnthropicGateway {
    client: Client,
    endpoint: Url,
    api_key: String,
    retry: RetryPolicy,
}

impl AnthropicGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        if config.api_key.trim().is_empty() {
            return Err(GatewayError::InvalidConfig(
                "an API key is required for the inference service".to_string(),
            ));
        }

        let base = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/')))?;
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            endpoint: base.join("v1/messages")?,
            api_key: config.api_key.trim().to_string(),
            retry: config.retry,
        })
    }

    async fn send_once(&self, body: &Value) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        let payload: MessagesResponse = response.json().await?;
        Ok(payload.first_text())
    }
}

#[async_trait]
impl InferenceGateway for AnthropicGateway {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, GatewayError> {
        let model = request.effective_model();
        if model != request.model {
            debug!(requested = request.model.id(), used = model.id(), "model upgraded for document input");
        }

        let body = json!({
            "model": model.id(),
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": [{ "role": "user", "content": request.content.to_json() }],
        });

        with_retry(&self.retry, || self.send_once(&body)).await
    }
}

fn classify_failure(status: u16, body: String) -> GatewayError {
    if status == OVERLOADED_STATUS || body.contains("overloaded_error") {
        GatewayError::UpstreamOverloaded { status, body }
    } else {
        GatewayError::Api { status, body }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl MessagesResponse {
    fn first_text(self) -> String {
        match self.content.into_iter().next() {
            Some(ContentBlock::Text { text }) => text,
            _ => String::new(),
        }
    }
}
