//! Client for OpenAI-compatible chat-completions endpoints.
//!
//! Posts to `{base_url}/chat/completions` with bearer auth. Blocking calls
//! read `choices[0].message.content`; streaming calls set `stream: true`
//! and read `choices[0].delta.content` from each SSE frame until
//! `data: [DONE]`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use mindflow_core::models::ChatMessage;

use super::sse::SseLineParser;
use super::{GenerationError, GenerationOptions, TextGenerator, TextStream};
use crate::config::{env_secret, LlmConfig};

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    default_model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceContent>,
    #[serde(default)]
    delta: Option<ChoiceContent>,
}

#[derive(Deserialize)]
struct ChoiceContent {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        default_model: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            default_model: default_model.to_string(),
            temperature: 0.7,
            max_tokens: 1024,
        })
    }

    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = env_secret(&config.api_key_env);
        if api_key.is_none() {
            tracing::warn!(
                var = %config.api_key_env,
                "no API key set for the generation service; requests are sent unauthenticated"
            );
        }
        let mut client = Self::new(
            &config.base_url,
            api_key,
            &config.default_model,
            Duration::from_secs(config.timeout_secs),
        )?;
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        Ok(client)
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let body = CompletionRequest {
            model: options.model.as_deref().unwrap_or(&self.default_model),
            messages,
            temperature: options.temperature.unwrap_or(self.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            stream,
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if stream {
            request = request.header("Accept", "text/event-stream");
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

fn transport_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Transport(err.to_string())
    }
}

/// Text carried by one streamed frame, if any.
fn parse_delta(data: &str) -> Result<Option<String>, GenerationError> {
    let frame: CompletionResponse = serde_json::from_str(data)
        .map_err(|e| GenerationError::Malformed(format!("invalid stream frame: {e}")))?;
    Ok(frame
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|s| !s.is_empty()))
}

#[async_trait]
impl TextGenerator for OpenAiCompatClient {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let response = self.send(messages, options, false).await?;
        let text = response.text().await.map_err(transport_error)?;
        let parsed: CompletionResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Malformed(format!("invalid completion body: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(content)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TextStream, GenerationError> {
        let response = self.send(messages, options, true).await?;
        let mut bytes = Box::pin(response.bytes_stream());

        let stream = async_stream::stream! {
            let mut parser = SseLineParser::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(transport_error(e));
                        return;
                    }
                };
                for event in parser.push(&chunk) {
                    if event.is_done() {
                        return;
                    }
                    match parse_delta(&event.data) {
                        Ok(Some(text)) => yield Ok(text),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            // Body ended without [DONE]: a dangling frame must still decode.
            if let Some(event) = parser.flush() {
                if !event.is_done() {
                    match parse_delta(&event.data) {
                        Ok(Some(text)) => yield Ok(text),
                        Ok(None) => {}
                        Err(e) => yield Err(e),
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
