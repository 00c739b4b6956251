//! OpenAI-compatible chat completions, shared by DeepSeek and LM Studio.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{parse_payload, send_for_body, Availability, Backend, Completion};
use crate::config::BackendDescriptor;
use crate::error::BackendError;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

/// Credential-bearing hosted endpoint versus a local server that may pick
/// its model at request time.
#[derive(Debug, Clone)]
enum Flavor {
    Hosted { api_key: String },
    Local,
}

pub struct OpenAiCompatible {
    client: Client,
    name: &'static str,
    base_url: String,
    default_model: String,
    flavor: Flavor,
}

impl OpenAiCompatible {
    pub fn with_key(client: Client, descriptor: &BackendDescriptor, api_key: String) -> Self {
        Self {
            client,
            name: descriptor.id.as_str(),
            base_url: descriptor.connection.base_url.clone(),
            default_model: descriptor.default_model.clone(),
            flavor: Flavor::Hosted { api_key },
        }
    }

    /// Local server without credentials. An empty default model means the
    /// first loaded model is discovered per request.
    pub fn local(client: Client, descriptor: &BackendDescriptor) -> Self {
        Self {
            client,
            name: descriptor.id.as_str(),
            base_url: descriptor.connection.base_url.clone(),
            default_model: descriptor.default_model.clone(),
            flavor: Flavor::Local,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.flavor {
            Flavor::Hosted { api_key } => request.bearer_auth(api_key),
            Flavor::Local => request,
        }
    }

    async fn list_models(&self, timeout: Duration) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/models", self.base_url);
        let request = self.authorize(self.client.get(&url));
        let body = send_for_body(request, timeout).await?;
        let list: ModelList = parse_payload(&body)?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    async fn resolve_model(&self, model: Option<&str>) -> Result<String, BackendError> {
        let chosen = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .or_else(|| Some(self.default_model.trim()).filter(|m| !m.is_empty()));
        if let Some(chosen) = chosen {
            return Ok(chosen.to_string());
        }

        let unreachable = |detail: String| {
            BackendError::Transport(format!(
                "LM Studio not reachable at {} or no models loaded: {}",
                self.base_url, detail
            ))
        };
        let models = self
            .list_models(DISCOVERY_TIMEOUT)
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        let first = models
            .into_iter()
            .next()
            .ok_or_else(|| unreachable("model list is empty".to_string()))?;
        debug!(backend = self.name, model = %first, "discovered loaded model");
        Ok(first)
    }
}

/// Joins the answer with any reasoning trace the server exposed.
fn compose_reply(content: &str, reasoning: Option<&str>) -> String {
    match reasoning.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reasoning) => format!(
            "<thinking>\n{}\n</thinking>\n\n{}",
            reasoning,
            content.trim()
        ),
        None => content.trim().to_string(),
    }
}

#[async_trait]
impl Backend for OpenAiCompatible {
    async fn execute(
        &self,
        prompt: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<Completion, BackendError> {
        let model = self.resolve_model(model).await?;
        let url = format!("{}/chat/completions", self.base_url);
        debug!(backend = self.name, model = %model, prompt_bytes = prompt.len(), "sending request");

        let body = ChatRequest {
            model: &model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };
        let request = self.authorize(self.client.post(&url)).json(&body);

        let text = send_for_body(request, timeout).await?;
        let parsed: ChatResponse = parse_payload(&text)?;

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| BackendError::NoResponse("no choices in response".to_string()))?;
        let finish_reason = choice.finish_reason;
        let message = choice.message.ok_or_else(|| {
            BackendError::NoResponse(format!(
                "choice without message, finish reason: {}",
                finish_reason.as_deref().unwrap_or("unknown")
            ))
        })?;

        let content = message.content.unwrap_or_default();
        let reasoning = message.reasoning_content.or(message.reasoning);
        let reply = compose_reply(&content, reasoning.as_deref());
        if reply.is_empty() {
            return Err(BackendError::NoResponse(format!(
                "empty message, finish reason: {}",
                finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        Ok(Completion {
            text: reply,
            model: parsed.model.unwrap_or(model),
        })
    }

    async fn probe(&self) -> Availability {
        match self.flavor {
            Flavor::Hosted { .. } => Availability::ready("API key set"),
            Flavor::Local => match self.list_models(PROBE_TIMEOUT).await {
                Ok(models) => Availability::ready(format!("{} model(s) loaded", models.len())),
                Err(err) => {
                    warn!(backend = self.name, error = %err, "probe failed");
                    Availability::unavailable("Not reachable")
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_http::{closed_port_url, MockResponse, MockServer};
    use crate::config::{BackendId, Connection};
    use serde_json::json;

    fn descriptor(id: BackendId, base_url: &str, default_model: &str) -> BackendDescriptor {
        BackendDescriptor {
            id,
            label: id.display_name().to_string(),
            default_model: default_model.to_string(),
            available_models: String::new(),
            connection: Connection {
                base_url: base_url.to_string(),
                api_key: None,
                mode: None,
                cli_command: None,
            },
        }
    }

    fn chat_reply(content: &str) -> MockResponse {
        MockResponse::json(
            200,
            json!({
                "model": "served-model",
                "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]
            }),
        )
    }

    #[tokio::test]
    async fn deepseek_sends_bearer_and_reads_first_choice() {
        let server = MockServer::start(vec![chat_reply("42")]).await;
        let backend = OpenAiCompatible::with_key(
            Client::new(),
            &descriptor(BackendId::Deepseek, &server.base_url, "deepseek-chat"),
            "sk-test".to_string(),
        );

        let completion = backend
            .execute("meaning of life?", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(completion.text, "42");
        assert_eq!(completion.model, "served-model");

        let request = &server.requests()[0];
        assert!(request.starts_with("POST /chat/completions"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert!(request.contains("\"model\":\"deepseek-chat\""));
        assert!(request.contains("\"stream\":false"));
    }

    #[tokio::test]
    async fn reasoning_is_wrapped_before_the_answer() {
        let server = MockServer::start(vec![MockResponse::json(
            200,
            json!({
                "choices": [{"message": {
                    "content": "Paris",
                    "reasoning_content": "The capital of France is Paris."
                }}]
            }),
        )])
        .await;
        let backend = OpenAiCompatible::with_key(
            Client::new(),
            &descriptor(BackendId::Deepseek, &server.base_url, "deepseek-reasoner"),
            "sk-test".to_string(),
        );

        let completion = backend
            .execute("capital?", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            completion.text,
            "<thinking>\nThe capital of France is Paris.\n</thinking>\n\nParis"
        );
        assert_eq!(completion.model, "deepseek-reasoner");
    }

    #[tokio::test]
    async fn empty_choices_is_no_response() {
        let server = MockServer::start(vec![MockResponse::json(200, json!({"choices": []}))]).await;
        let backend = OpenAiCompatible::with_key(
            Client::new(),
            &descriptor(BackendId::Deepseek, &server.base_url, "deepseek-chat"),
            "sk-test".to_string(),
        );
        let err = backend
            .execute("hi", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NoResponse(_)));
    }

    #[tokio::test]
    async fn local_server_discovers_first_loaded_model() {
        let server = MockServer::start(vec![
            MockResponse::json(
                200,
                json!({"data": [{"id": "qwen2.5-7b-instruct"}, {"id": "llama-3.1-8b"}]}),
            ),
            chat_reply("hello from local"),
        ])
        .await;
        let backend = OpenAiCompatible::local(
            Client::new(),
            &descriptor(BackendId::Lmstudio, &server.base_url, ""),
        );

        let completion = backend
            .execute("hi", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(completion.text, "hello from local");

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("GET /models"));
        assert!(!requests[0].to_ascii_lowercase().contains("authorization:"));
        assert!(requests[1].contains("\"model\":\"qwen2.5-7b-instruct\""));
    }

    #[tokio::test]
    async fn local_server_with_no_models_is_reported() {
        let server = MockServer::start(vec![MockResponse::json(200, json!({"data": []}))]).await;
        let backend = OpenAiCompatible::local(
            Client::new(),
            &descriptor(BackendId::Lmstudio, &server.base_url, ""),
        );
        let err = backend
            .execute("hi", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no models loaded"));
    }

    #[tokio::test]
    async fn unreachable_local_server_fails_fast() {
        let base = closed_port_url().await;
        let backend =
            OpenAiCompatible::local(Client::new(), &descriptor(BackendId::Lmstudio, &base, ""));

        let err = backend
            .execute("hi", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport(ref m) if m.contains("not reachable")));

        let probe = backend.probe().await;
        assert_eq!(probe, Availability::unavailable("Not reachable"));
    }

    #[tokio::test]
    async fn local_probe_counts_models() {
        let server = MockServer::start(vec![MockResponse::json(
            200,
            json!({"data": [{"id": "a"}, {"id": "b"}]}),
        )])
        .await;
        let backend = OpenAiCompatible::local(
            Client::new(),
            &descriptor(BackendId::Lmstudio, &server.base_url, ""),
        );
        assert_eq!(backend.probe().await, Availability::ready("2 model(s) loaded"));
    }

    #[test]
    fn compose_reply_without_reasoning_is_plain() {
        assert_eq!(compose_reply("  answer \n", None), "answer");
        assert_eq!(compose_reply("answer", Some("   ")), "answer");
    }
}
