//! Hosted chat APIs with vendor-specific wire shapes: Anthropic Messages and
//! Gemini `generateContent`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{parse_payload, pick_model, send_for_body, Availability, Backend, Completion};
use crate::config::BackendDescriptor;
use crate::error::BackendError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 8192;

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Option<Vec<AnthropicContentBlock>>,
    stop_reason: Option<String>,
    model: Option<String>,
}

pub struct AnthropicApi {
    client: Client,
    base_url: String,
    api_key: String,
    default_model: String,
}

impl AnthropicApi {
    pub fn new(client: Client, descriptor: &BackendDescriptor, api_key: String) -> Self {
        Self {
            client,
            base_url: descriptor.connection.base_url.clone(),
            api_key,
            default_model: descriptor.default_model.clone(),
        }
    }
}

#[async_trait]
impl Backend for AnthropicApi {
    async fn execute(
        &self,
        prompt: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<Completion, BackendError> {
        let model = pick_model(model, &self.default_model);
        let url = format!("{}/messages", self.base_url);
        debug!(backend = "anthropic", model = %model, prompt_bytes = prompt.len(), "sending request");

        let body = AnthropicRequest {
            model,
            max_tokens: ANTHROPIC_MAX_TOKENS,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };
        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        let text = send_for_body(request, timeout).await?;
        let parsed: AnthropicResponse = parse_payload(&text)?;

        let chunks: Vec<String> = parsed
            .content
            .unwrap_or_default()
            .into_iter()
            .filter(|block| block.kind.as_deref() == Some("text"))
            .filter_map(|block| block.text)
            .filter(|t| !t.trim().is_empty())
            .collect();

        if chunks.is_empty() {
            return Err(BackendError::NoResponse(format!(
                "no text content, stop reason: {}",
                parsed.stop_reason.as_deref().unwrap_or("unknown")
            )));
        }

        Ok(Completion {
            text: chunks.join("\n"),
            model: parsed.model.unwrap_or_else(|| model.to_string()),
        })
    }

    async fn probe(&self) -> Availability {
        Availability::ready("API key set")
    }
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    parts: Option<Vec<GeminiResponsePart>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
    model_version: Option<String>,
}

pub struct GeminiApi {
    client: Client,
    base_url: String,
    api_key: String,
    default_model: String,
}

impl GeminiApi {
    pub fn new(client: Client, descriptor: &BackendDescriptor, api_key: String) -> Self {
        Self {
            client,
            base_url: descriptor.connection.base_url.clone(),
            api_key,
            default_model: descriptor.default_model.clone(),
        }
    }
}

#[async_trait]
impl Backend for GeminiApi {
    async fn execute(
        &self,
        prompt: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<Completion, BackendError> {
        let model = pick_model(model, &self.default_model);
        let model_path = model.strip_prefix("models/").unwrap_or(model);
        let url = format!("{}/models/{}:generateContent", self.base_url, model_path);
        debug!(backend = "gemini", model = %model, prompt_bytes = prompt.len(), "sending request");

        let body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPart { text: prompt }],
            }],
        };
        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);

        let text = send_for_body(request, timeout).await?;
        let parsed: GeminiResponse = parse_payload(&text)?;

        let candidate = parsed.candidates.and_then(|c| c.into_iter().next());
        let finish_reason = candidate.as_ref().and_then(|c| c.finish_reason.clone());
        let chunks: Vec<String> = candidate
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter(|part| !part.thought)
            .filter_map(|part| part.text)
            .filter(|t| !t.trim().is_empty())
            .collect();

        if chunks.is_empty() {
            let reason = parsed
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .or(finish_reason)
                .unwrap_or_else(|| "unknown".to_string());
            return Err(BackendError::NoResponse(format!(
                "no text parts, reason: {}",
                reason
            )));
        }

        Ok(Completion {
            text: chunks.join(""),
            model: parsed.model_version.unwrap_or_else(|| model.to_string()),
        })
    }

    async fn probe(&self) -> Availability {
        Availability::ready("API key set (api mode)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_http::{MockResponse, MockServer};
    use crate::config::{BackendId, Connection};
    use serde_json::json;
    use std::time::Instant;

    fn descriptor(id: BackendId, base_url: &str) -> BackendDescriptor {
        BackendDescriptor {
            id,
            label: id.display_name().to_string(),
            default_model: id.default_model().to_string(),
            available_models: String::new(),
            connection: Connection {
                base_url: base_url.to_string(),
                api_key: Some("test-key".to_string()),
                mode: None,
                cli_command: None,
            },
        }
    }

    fn anthropic(base_url: &str) -> AnthropicApi {
        AnthropicApi::new(
            Client::new(),
            &descriptor(BackendId::Anthropic, base_url),
            "test-key".to_string(),
        )
    }

    #[tokio::test]
    async fn anthropic_concatenates_text_blocks() {
        let server = MockServer::start(vec![MockResponse::json(
            200,
            json!({
                "model": "claude-sonnet-4-5-20250929",
                "content": [
                    {"type": "text", "text": "Hello"},
                    {"type": "tool_use", "id": "t1"},
                    {"type": "text", "text": "world"}
                ],
                "stop_reason": "end_turn"
            }),
        )])
        .await;

        let api = anthropic(&format!("{}/v1", server.base_url));
        let completion = api
            .execute("Say hi", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(completion.text, "Hello\nworld");
        assert_eq!(completion.model, "claude-sonnet-4-5-20250929");

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("POST /v1/messages"));
        assert!(requests[0].contains("x-api-key: test-key"));
        assert!(requests[0].contains("\"content\":\"Say hi\""));
    }

    #[tokio::test]
    async fn anthropic_maps_non_success_status() {
        let server = MockServer::start(vec![MockResponse::text(
            429,
            r#"{"error":{"type":"rate_limit_error"}}"#,
        )])
        .await;

        let err = anthropic(&server.base_url)
            .execute("hi", Some("claude-haiku-4-5-20251001"), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            BackendError::Http { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("rate_limit_error"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn anthropic_without_text_is_no_response() {
        let server = MockServer::start(vec![MockResponse::json(
            200,
            json!({"content": [], "stop_reason": "max_tokens"}),
        )])
        .await;

        let err = anthropic(&server.base_url)
            .execute("hi", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NoResponse(ref m) if m.contains("max_tokens")));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out_near_the_deadline() {
        let server = MockServer::start(vec![MockResponse::json(
            200,
            json!({"content": [{"type": "text", "text": "late"}]}),
        )
        .delayed(Duration::from_secs(3))])
        .await;

        let started = Instant::now();
        let err = anthropic(&server.base_url)
            .execute("hi", None, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn gemini_joins_parts_and_skips_thoughts() {
        let server = MockServer::start(vec![MockResponse::json(
            200,
            json!({
                "candidates": [{
                    "content": {"parts": [
                        {"text": "thinking...", "thought": true},
                        {"text": "Part one. "},
                        {"text": "Part two."}
                    ]},
                    "finishReason": "STOP"
                }],
                "modelVersion": "gemini-2.5-pro"
            }),
        )])
        .await;

        let api = GeminiApi::new(
            Client::new(),
            &descriptor(BackendId::Gemini, &server.base_url),
            "test-key".to_string(),
        );
        let completion = api
            .execute("hi", Some("gemini-2.5-pro"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(completion.text, "Part one. Part two.");
        assert_eq!(completion.model, "gemini-2.5-pro");

        let request = &server.requests()[0];
        assert!(request.starts_with("POST /models/gemini-2.5-pro:generateContent"));
        assert!(request.contains("x-goog-api-key: test-key"));
    }

    #[tokio::test]
    async fn gemini_blocked_prompt_reports_reason() {
        let server = MockServer::start(vec![MockResponse::json(
            200,
            json!({"promptFeedback": {"blockReason": "SAFETY"}}),
        )])
        .await;

        let api = GeminiApi::new(
            Client::new(),
            &descriptor(BackendId::Gemini, &server.base_url),
            "test-key".to_string(),
        );
        let err = api
            .execute("hi", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }
}
