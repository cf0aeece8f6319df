use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::{ChatMessage, LlmClient, LlmError, MessageRole};

pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct ChatCompletionsSettings {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

/// Client for any `/chat/completions` endpoint: OpenAI itself or a local
/// OpenAI-compatible server such as Ollama.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatibleClient {
    pub fn new(settings: ChatCompletionsSettings) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key,
            model: settings.model,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(2);
        if let Some(api_key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
            {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: MessageRole,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn generate(
        &self,
        system_instruction: &str,
        history: &[ChatMessage],
    ) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage { role: MessageRole::System, content: system_instruction });
        messages.extend(
            history
                .iter()
                .map(|message| WireMessage { role: message.role, content: &message.content }),
        );

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            event_name = "llm.request",
            model = %self.model,
            turns = history.len(),
            "calling model"
        );

        let response = self
            .http_client
            .post(&url)
            .headers(self.headers())
            .json(&request)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let payload = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|error| LlmError::Decode(error.to_string()))?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

pub const NO_ACCESS_REPLY: &str = "I don't have access to that information.";

/// Offline answerer that quotes the permitted context verbatim.
///
/// It never invents content and never emits a calculation request, which
/// makes it usable for demos and smoke tests without a model endpoint.
#[derive(Clone, Debug, Default)]
pub struct ExtractiveClient {
    max_passages: usize,
}

impl ExtractiveClient {
    pub fn new(max_passages: usize) -> Self {
        Self { max_passages: max_passages.max(1) }
    }
}

#[async_trait]
impl LlmClient for ExtractiveClient {
    async fn generate(
        &self,
        system_instruction: &str,
        history: &[ChatMessage],
    ) -> Result<String, LlmError> {
        if let Some(calculated) = history
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .and_then(|message| message.content.strip_prefix("Calculated Result: "))
        {
            return Ok(format!("The calculated result is {calculated}."));
        }

        let limit = if self.max_passages == 0 { usize::MAX } else { self.max_passages };
        let passages = system_instruction
            .lines()
            .filter_map(parse_context_line)
            .take(limit)
            .map(|(source, content)| format!("- {content} ({source})"))
            .collect::<Vec<_>>();

        if passages.is_empty() {
            return Ok(NO_ACCESS_REPLY.to_string());
        }
        Ok(format!("From the documents available to you:\n{}", passages.join("\n")))
    }

    fn model_name(&self) -> &str {
        "extractive"
    }
}

/// Splits `Source (<label>, <source>): <content>` into source and content.
fn parse_context_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("Source (")?;
    let (header, content) = rest.split_once("): ")?;
    let (_, source) = header.split_once(", ")?;
    Some((source, content.trim()))
}
