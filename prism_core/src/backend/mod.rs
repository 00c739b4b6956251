//! Backend adapters, one per backend kind.

pub mod cli;
pub mod hosted;
pub mod openai_compat;

#[cfg(test)]
pub(crate) mod mock_http;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendDescriptor, BackendId, GeminiMode, RelayConfig};
use crate::error::BackendError;

pub use cli::CliBackend;
pub use hosted::{AnthropicApi, GeminiApi};
pub use openai_compat::OpenAiCompatible;

const MAX_ERROR_BODY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Model that actually served the request.
    pub model: String,
}

/// Result of a cheap readiness check that does not issue a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub detail: String,
}

impl Availability {
    pub fn ready(detail: impl Into<String>) -> Self {
        Self {
            available: true,
            detail: detail.into(),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            available: false,
            detail: detail.into(),
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Runs one prompt. `model` overrides the configured default.
    async fn execute(
        &self,
        prompt: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<Completion, BackendError>;

    async fn probe(&self) -> Availability;
}

/// Adapter standing in for a backend whose preconditions are not met.
pub struct Misconfigured {
    reason: String,
    status: String,
}

impl Misconfigured {
    pub fn new(reason: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            status: status.into(),
        }
    }
}

#[async_trait]
impl Backend for Misconfigured {
    async fn execute(
        &self,
        _prompt: &str,
        _model: Option<&str>,
        _timeout: Duration,
    ) -> Result<Completion, BackendError> {
        Err(BackendError::Config(self.reason.clone()))
    }

    async fn probe(&self) -> Availability {
        Availability::unavailable(self.status.clone())
    }
}

#[derive(Clone)]
pub struct BackendEntry {
    pub descriptor: BackendDescriptor,
    pub adapter: Arc<dyn Backend>,
}

#[derive(Clone, Default)]
pub struct BackendSet {
    entries: Vec<BackendEntry>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        let client = Client::new();
        let mut set = Self::new();
        for descriptor in &config.backends {
            let adapter = resolve_adapter(descriptor, &client);
            set.insert(descriptor.clone(), adapter);
        }
        set
    }

    /// Adds or replaces the adapter for `descriptor.id`.
    pub fn insert(&mut self, descriptor: BackendDescriptor, adapter: Arc<dyn Backend>) {
        let entry = BackendEntry {
            descriptor,
            adapter,
        };
        match self
            .entries
            .iter_mut()
            .find(|e| e.descriptor.id == entry.descriptor.id)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get(&self, id: BackendId) -> Option<&BackendEntry> {
        self.entries.iter().find(|e| e.descriptor.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackendEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn resolve_adapter(descriptor: &BackendDescriptor, client: &Client) -> Arc<dyn Backend> {
    let conn = &descriptor.connection;
    match descriptor.id {
        BackendId::Anthropic => match &conn.api_key {
            Some(key) => Arc::new(AnthropicApi::new(client.clone(), descriptor, key.clone())),
            None => missing_key("ANTHROPIC_API_KEY", "Anthropic"),
        },
        BackendId::Deepseek => match &conn.api_key {
            Some(key) => Arc::new(OpenAiCompatible::with_key(
                client.clone(),
                descriptor,
                key.clone(),
            )),
            None => missing_key("DEEPSEEK_API_KEY", "DeepSeek"),
        },
        BackendId::Lmstudio => Arc::new(OpenAiCompatible::local(client.clone(), descriptor)),
        BackendId::Gemini => match conn.mode.unwrap_or_default() {
            GeminiMode::Api => match &conn.api_key {
                Some(key) => Arc::new(GeminiApi::new(client.clone(), descriptor, key.clone())),
                None => Arc::new(Misconfigured::new(
                    "Gemini mode is `api` but GEMINI_API_KEY is not set; set the key or switch GEMINI_MODE to `cli`",
                    "API mode, no API key",
                )),
            },
            GeminiMode::Cli => {
                let command = conn
                    .cli_command
                    .as_deref()
                    .unwrap_or(prism_exec::gemini::DEFAULT_GEMINI_COMMAND);
                match CliBackend::gemini(command, descriptor) {
                    Ok(backend) => Arc::new(backend),
                    Err(err) => Arc::new(Misconfigured::new(
                        format!("invalid GEMINI_CLI command `{}`: {}", command, err),
                        "Invalid CLI command",
                    )),
                }
            }
        },
    }
}

fn missing_key(var: &str, label: &str) -> Arc<dyn Backend> {
    Arc::new(Misconfigured::new(
        format!("{} is not set; add the {} API key to the settings file or environment", var, label),
        "No API key",
    ))
}

/// Sends `request` and returns the body of a 2xx response, all under `timeout`.
pub(crate) async fn send_for_body(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<String, BackendError> {
    let exchange = async {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok::<_, reqwest::Error>((status, body))
    };

    let (status, body) = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| BackendError::Timeout(timeout))?
        .map_err(|e| BackendError::from_reqwest(e, timeout))?;

    if !status.is_success() {
        return Err(BackendError::Http {
            status: status.as_u16(),
            body: truncate_error(body.trim()),
        });
    }
    Ok(body)
}

pub(crate) fn parse_payload<T: DeserializeOwned>(body: &str) -> Result<T, BackendError> {
    serde_json::from_str(body).map_err(|e| {
        BackendError::NoResponse(format!(
            "malformed payload: {} | raw: {}",
            e,
            truncate_error(body)
        ))
    })
}

pub(crate) fn truncate_error(text: &str) -> String {
    if text.len() <= MAX_ERROR_BODY {
        return text.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

pub(crate) fn pick_model<'a>(override_model: Option<&'a str>, default: &'a str) -> &'a str {
    override_model
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(default)
}
