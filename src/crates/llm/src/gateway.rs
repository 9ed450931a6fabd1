//! The completion gateway boundary.
//!
//! A gateway takes an ordered conversation and returns either a full message
//! or a stream of typed deltas, always reporting why the model stopped. The
//! rest of the system only depends on three things coming back: content,
//! the finish reason, and token usage.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use llm::{CompletionGateway, CompletionRequest, Message, StreamEvent};
//!
//! let request = CompletionRequest::new("gpt-4o", vec![Message::user("Hello")])
//!     .with_max_tokens(4096);
//!
//! let mut stream = gateway.stream(request).await?;
//! while let Some(event) = stream.next().await {
//!     if let StreamEvent::Delta { content } = event? {
//!         print!("{}", content);
//!     }
//! }
//! ```

use crate::error::Result;
use crate::message::Message;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A request to a completion service.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Conversation turns, in order.
    pub messages: Vec<Message>,

    /// Model identifier.
    pub model: String,

    /// Token ceiling for this single call.
    pub max_tokens: Option<usize>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Whether the caller wants a delta stream.
    pub stream: bool,
}

impl CompletionRequest {
    /// Create a request with default sampling parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: model.into(),
            max_tokens: None,
            temperature: None,
            stream: false,
        }
    }

    /// Set the maximum number of tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature for generation.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the streaming flag.
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Content of the trailing assistant turn, if the conversation ends in one.
    pub fn prefill(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|m| m.role == crate::Role::Assistant)
            .map(|m| m.content.as_str())
    }
}

/// Why the model stopped producing tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model considers its answer complete.
    Stop,
    /// The token ceiling cut the answer off.
    Length,
    /// The provider filtered the output.
    ContentFilter,
    /// Anything else the provider reported.
    Other(String),
}

impl FinishReason {
    /// Parse a provider's finish reason string.
    pub fn parse(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" | "eos" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }

    /// True when the answer was truncated by the token ceiling.
    pub fn is_length(&self) -> bool {
        matches!(self, FinishReason::Length)
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other(reason) => reason,
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage for one call, or accumulated over several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Add another call's usage to this one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A full, non-streamed response.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    pub fn new(content: impl Into<String>, finish_reason: Option<FinishReason>) -> Self {
        Self {
            content: content.into(),
            finish_reason,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// One event of a streamed response. The end of the stream ends the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A piece of generated content.
    Delta { content: String },

    /// The model stopped, and why.
    Finish { reason: FinishReason },

    /// Token accounting, usually sent once near the end.
    Usage(Usage),
}

/// Stream of typed events from a single call.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Boundary to a remote completion service.
///
/// Implementations must be `Send + Sync`; share them as
/// `Arc<dyn CompletionGateway>`. Transport or auth failures are returned as
/// errors and never retried here.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Send the conversation and wait for the whole message.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Send the conversation and receive deltas as they arrive.
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream>;

    /// Short provider name used in logs.
    fn name(&self) -> &str {
        "gateway"
    }
}
