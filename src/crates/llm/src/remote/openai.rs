//! OpenAI-compatible chat completions client.
//!
//! Speaks the `/chat/completions` dialect shared by OpenAI, Deepseek,
//! OpenRouter, Moonshot and most self-hosted servers. Streaming responses
//! arrive as server-sent events; each `data:` line is a JSON chunk and the
//! literal `[DONE]` ends the stream.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::remote::OpenAiCompatibleClient;
//! use llm::{CompletionGateway, CompletionRequest, Message, RemoteLlmConfig};
//!
//! let config = RemoteLlmConfig::from_env(
//!     "OPENAI_API_KEY",
//!     "https://api.openai.com/v1",
//!     "gpt-4o",
//! )?;
//! let client = OpenAiCompatibleClient::new(config)?;
//!
//! let request = CompletionRequest::new("gpt-4o", vec![Message::user("Hello!")]);
//! let response = client.complete(request).await?;
//! ```

use crate::config::RemoteLlmConfig;
use crate::error::{LlmError, Result};
use crate::gateway::{
    CompletionGateway, CompletionRequest, CompletionResponse, CompletionStream, FinishReason,
    StreamEvent, Usage,
};
use crate::message::Message;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::{debug, warn};

/// Client for any OpenAI-compatible completion endpoint.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    config: RemoteLlmConfig,
    client: Client,
}

impl OpenAiCompatibleClient {
    /// Create a new client with the given configuration.
    pub fn new(config: RemoteLlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &RemoteLlmConfig {
        &self.config
    }

    /// Build the wire request. A trailing assistant turn with no content is
    /// dropped since most providers reject it.
    fn build_body(&self, request: &CompletionRequest, stream: bool) -> OpenAiRequest {
        let mut messages: Vec<&Message> = request.messages.iter().collect();
        if messages.last().is_some_and(|m| m.is_empty_assistant()) {
            messages.pop();
        }

        let model = if request.model.is_empty() {
            self.config.model.clone()
        } else {
            request.model.clone()
        };

        OpenAiRequest {
            model,
            messages: messages
                .into_iter()
                .map(|m| OpenAiMessage {
                    role: m.role.as_str().to_string(),
                    content: Some(m.content.clone()),
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }

    async fn send(&self, body: &OpenAiRequest) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .post(self.config.completions_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(body);

        if let Some(org) = &self.config.organization {
            req = req.header("OpenAI-Organization", org);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(e.to_string())
            } else {
                LlmError::HttpError(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthenticationError(error_text),
                429 => LlmError::RateLimitExceeded(error_text),
                400 => LlmError::InvalidRequest(error_text),
                _ => LlmError::ProviderError(format!("API error {}: {}", status, error_text)),
            });
        }

        Ok(response)
    }

    fn convert_response(resp: OpenAiResponse) -> Result<CompletionResponse> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("Response has no choices".to_string()))?;

        let mut response = CompletionResponse::new(
            choice.message.content.unwrap_or_default(),
            choice.finish_reason.as_deref().map(FinishReason::parse),
        );
        if let Some(usage) = resp.usage {
            response = response.with_usage(usage.into());
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionGateway for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.build_body(&request, false);
        debug!(model = %body.model, turns = body.messages.len(), "Sending completion request");

        let response = self.send(&body).await?;
        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Self::convert_response(parsed)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let body = self.build_body(&request, true);
        debug!(model = %body.model, turns = body.messages.len(), "Opening completion stream");

        let response = self.send(&body).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()));

        Ok(Box::pin(sse_events(bytes)))
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct SseState {
    bytes: ByteStream,
    decoder: LineDecoder,
    pending: VecDeque<Result<StreamEvent>>,
    finished: bool,
}

/// Turn a raw SSE byte stream into typed events.
fn sse_events<S>(bytes: S) -> impl Stream<Item = Result<StreamEvent>> + Send
where
    S: Stream<Item = reqwest::Result<Vec<u8>>> + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        decoder: LineDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((event, st));
            }
            if st.finished {
                return None;
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    for line in st.decoder.push(&chunk) {
                        st.finished |= handle_line(&line, &mut st.pending);
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending.push_back(Err(LlmError::StreamError(e.to_string())));
                }
                None => {
                    if let Some(line) = st.decoder.finish() {
                        handle_line(&line, &mut st.pending);
                    }
                    st.finished = true;
                }
            }
        }
    })
}

/// Parse one SSE line into events. Returns true on the `[DONE]` sentinel.
fn handle_line(line: &str, out: &mut VecDeque<Result<StreamEvent>>) -> bool {
    let Some(payload) = line.strip_prefix("data:") else {
        return false;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return false;
    }
    if payload == "[DONE]" {
        return true;
    }

    match serde_json::from_str::<OpenAiStreamChunk>(payload) {
        Ok(chunk) => {
            for choice in chunk.choices {
                if let Some(content) = choice.delta.and_then(|d| d.content) {
                    if !content.is_empty() {
                        out.push_back(Ok(StreamEvent::Delta { content }));
                    }
                }
                if let Some(reason) = choice.finish_reason {
                    out.push_back(Ok(StreamEvent::Finish {
                        reason: FinishReason::parse(&reason),
                    }));
                }
            }
            if let Some(usage) = chunk.usage {
                out.push_back(Ok(StreamEvent::Usage(usage.into())));
            }
        }
        Err(e) => {
            warn!("Skipping malformed stream chunk: {}", e);
        }
    }
    false
}

/// Splits a byte stream into complete lines without cutting UTF-8 sequences.
#[derive(Debug, Default)]
struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: Option<OpenAiDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

impl From<OpenAiUsage> for Usage {
    fn from(u: OpenAiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiCompatibleClient {
        let config = RemoteLlmConfig::new("test-key", "https://api.openai.com/v1", "gpt-4o");
        OpenAiCompatibleClient::new(config).unwrap()
    }

    #[test]
    fn test_body_drops_empty_trailing_assistant() {
        let request = CompletionRequest::new(
            "gpt-4o",
            vec![
                Message::system("sys"),
                Message::user("write"),
                Message::assistant(""),
            ],
        );

        let body = client().build_body(&request, true);
        assert_eq!(body.messages.len(), 2);
        assert!(body.stream);
        assert!(body.stream_options.is_some());
    }

    #[test]
    fn test_body_keeps_prefill() {
        let request = CompletionRequest::new(
            "",
            vec![Message::user("write"), Message::assistant("{\"a\"")],
        );

        let body = client().build_body(&request, false);
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[1].role, "assistant");
        assert_eq!(body.model, "gpt-4o");
        assert!(body.stream_options.is_none());
    }

    #[test]
    fn test_convert_response() {
        let resp: OpenAiResponse = serde_json::from_str(
            r#"{
                "choices": [{"message": {"role": "assistant", "content": "Hi"}, "finish_reason": "length"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
            }"#,
        )
        .unwrap();

        let converted = OpenAiCompatibleClient::convert_response(resp).unwrap();
        assert_eq!(converted.content, "Hi");
        assert_eq!(converted.finish_reason, Some(FinishReason::Length));
        assert_eq!(converted.usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn test_convert_response_without_choices() {
        let resp: OpenAiResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(OpenAiCompatibleClient::convert_response(resp).is_err());
    }

    #[test]
    fn test_line_decoder_split_across_chunks() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let lines = decoder.push(b": 1}\r\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"a\": 1}".to_string(), "data: [DONE]".to_string()]);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_line_decoder_multibyte_boundary() {
        let mut decoder = LineDecoder::default();
        let text = "data: 计数器\n".as_bytes();
        let (head, tail) = text.split_at(8);
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec!["data: 计数器".to_string()]);
    }

    #[tokio::test]
    async fn test_sse_events() {
        let raw = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            ": keep-alive\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"length\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":2,\"total_tokens\":3}}\n\n",
            "data: [DONE]\n\n",
        );
        let chunks: Vec<reqwest::Result<Vec<u8>>> = raw
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(c.to_vec()))
            .collect();

        let events: Vec<StreamEvent> = sse_events(futures::stream::iter(chunks))
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Delta { content: "Hel".into() },
                StreamEvent::Delta { content: "lo".into() },
                StreamEvent::Finish { reason: FinishReason::Length },
                StreamEvent::Usage(Usage::new(1, 2)),
            ]
        );
    }
}
