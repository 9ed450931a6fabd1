//! In-memory gateway for tests.
//!
//! [`ScriptedGateway`] replays a fixed script of rounds, one per call, and
//! records every request it receives so tests can assert on call counts and
//! on the prefill that was sent back.

use crate::error::{LlmError, Result};
use crate::gateway::{
    CompletionGateway, CompletionRequest, CompletionResponse, CompletionStream, FinishReason,
    StreamEvent, Usage,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Failure kinds a script can inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Rejected credentials.
    Auth(String),
    /// Network-level failure.
    Transport(String),
    /// Provider returned an error status.
    Provider(String),
}

impl ScriptedFailure {
    fn to_error(&self) -> LlmError {
        match self {
            ScriptedFailure::Auth(msg) => LlmError::AuthenticationError(msg.clone()),
            ScriptedFailure::Transport(msg) => LlmError::Timeout(msg.clone()),
            ScriptedFailure::Provider(msg) => LlmError::ProviderError(msg.clone()),
        }
    }
}

/// What one call returns.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedRound {
    /// Content split into stream deltas, then an optional finish reason.
    Reply {
        chunks: Vec<String>,
        finish_reason: Option<FinishReason>,
        usage: Option<Usage>,
    },
    /// The call is rejected before any content.
    Fail(ScriptedFailure),
    /// Some deltas arrive, then the stream breaks.
    BreakMidStream { chunks: Vec<String>, message: String },
}

impl ScriptedRound {
    /// A single-chunk reply.
    pub fn reply(content: impl Into<String>, finish_reason: FinishReason) -> Self {
        ScriptedRound::Reply {
            chunks: vec![content.into()],
            finish_reason: Some(finish_reason),
            usage: None,
        }
    }

    fn into_events(self) -> Result<Vec<Result<StreamEvent>>> {
        match self {
            ScriptedRound::Reply {
                chunks,
                finish_reason,
                usage,
            } => {
                let mut events: Vec<Result<StreamEvent>> = chunks
                    .into_iter()
                    .map(|content| Ok(StreamEvent::Delta { content }))
                    .collect();
                if let Some(reason) = finish_reason {
                    events.push(Ok(StreamEvent::Finish { reason }));
                }
                if let Some(usage) = usage {
                    events.push(Ok(StreamEvent::Usage(usage)));
                }
                Ok(events)
            }
            ScriptedRound::Fail(failure) => Err(failure.to_error()),
            ScriptedRound::BreakMidStream { chunks, message } => {
                let mut events: Vec<Result<StreamEvent>> = chunks
                    .into_iter()
                    .map(|content| Ok(StreamEvent::Delta { content }))
                    .collect();
                events.push(Err(LlmError::StreamError(message)));
                Ok(events)
            }
        }
    }
}

/// Gateway that replays a script and records requests.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<ScriptedRound>>,
    /// Returned once the script runs out; `None` means a provider error.
    repeat: Option<ScriptedRound>,
    requests: Mutex<Vec<CompletionRequest>>,
    latency: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an arbitrary round.
    pub fn then(self, round: ScriptedRound) -> Self {
        self.script.lock().push_back(round);
        self
    }

    /// Queue a single-chunk reply.
    pub fn reply(self, content: impl Into<String>, finish_reason: FinishReason) -> Self {
        self.then(ScriptedRound::reply(content, finish_reason))
    }

    /// Queue a reply delivered as several deltas.
    pub fn reply_chunks<I, S>(self, chunks: I, finish_reason: FinishReason) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.then(ScriptedRound::Reply {
            chunks: chunks.into_iter().map(Into::into).collect(),
            finish_reason: Some(finish_reason),
            usage: None,
        })
    }

    /// Queue a rejected call.
    pub fn fail(self, failure: ScriptedFailure) -> Self {
        self.then(ScriptedRound::Fail(failure))
    }

    /// Answer every call past the end of the script with `round`.
    pub fn repeat(mut self, round: ScriptedRound) -> Self {
        self.repeat = Some(round);
        self
    }

    /// Sleep this long before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    async fn next_round(&self, request: CompletionRequest) -> Result<ScriptedRound> {
        self.requests.lock().push(request);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let next = self.script.lock().pop_front();
        next.or_else(|| self.repeat.clone())
            .ok_or_else(|| LlmError::ProviderError("script exhausted".to_string()))
    }
}

#[async_trait]
impl CompletionGateway for ScriptedGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let events = self.next_round(request).await?.into_events()?;

        let mut response = CompletionResponse::new(String::new(), None);
        for event in events {
            match event? {
                StreamEvent::Delta { content } => response.content.push_str(&content),
                StreamEvent::Finish { reason } => response.finish_reason = Some(reason),
                StreamEvent::Usage(usage) => response.usage = Some(usage),
            }
        }
        Ok(response)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let events = self.next_round(request).await?.into_events()?;
        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
