//! Continuation Engine
//!
//! Produces one logical response from a model whose single-call output is
//! capped. Every round sends the conversation with the text generated so far
//! as a trailing assistant turn (the prefill), so the model resumes where it
//! was cut off. Rounds continue while the gateway reports `length`.
//!
//! The engine keeps no state between calls and never retries a failed
//! gateway call; errors propagate to the caller.

use crate::executor::events::{ContinuationObserver, NoopObserver};
use crate::executor::prompt::EMPTY_RETRY_INSTRUCTION;
use crate::Result;
use futures::StreamExt;
use llm::{CompletionGateway, CompletionRequest, FinishReason, Message, StreamEvent, Usage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Continuation engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationConfig {
    /// Model identifier sent with every request
    pub model: String,
    /// Token ceiling for each round
    pub max_tokens: usize,
    /// Sampling temperature
    pub temperature: f32,
    /// Hard cap on rounds, including the empty-round retry
    pub max_loops: u32,
    /// Use the gateway's delta stream instead of whole responses
    pub streaming: bool,
    /// Pause before every round after the first
    pub round_delay: Duration,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            max_loops: 20,
            streaming: true,
            round_delay: Duration::from_millis(50),
        }
    }
}

/// Why the engine stopped calling the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model finished on its own
    Completed,
    /// `max_loops` rounds ran; the text may be truncated
    MaxLoops,
    /// A round produced nothing
    EmptyRound,
}

/// Stitched result of all rounds
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationOutput {
    /// Concatenation of every round's content
    pub text: String,
    /// Gateway calls made
    pub rounds: u32,
    /// Finish reason of the last round
    pub finish_reason: Option<FinishReason>,
    /// Why the engine stopped asking for more
    pub stop: StopReason,
    /// Usage summed over all rounds that reported it
    pub usage: Usage,
}

impl ContinuationOutput {
    /// Whether the model signalled a natural end
    pub fn is_complete(&self) -> bool {
        self.stop == StopReason::Completed
    }
}

/// System, user and growing assistant turn.
#[derive(Debug, Clone)]
struct Conversation {
    system: String,
    user: String,
    prefill: String,
}

impl Conversation {
    fn new(system: &str, user: &str) -> Self {
        Self {
            system: system.to_string(),
            user: user.to_string(),
            prefill: String::new(),
        }
    }

    fn messages(&self) -> Vec<Message> {
        vec![
            Message::system(self.system.clone()),
            Message::user(self.user.clone()),
            Message::assistant(self.prefill.clone()),
        ]
    }

    fn extend(&mut self, chunk: &str) {
        self.prefill.push_str(chunk);
    }

    fn insist(&mut self) {
        self.user.push_str("\n\n");
        self.user.push_str(EMPTY_RETRY_INSTRUCTION);
    }
}

/// Output of a single gateway call
#[derive(Debug, Default)]
struct Round {
    content: String,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

/// Drives a gateway through as many rounds as a response needs
pub struct ContinuationEngine {
    gateway: Arc<dyn CompletionGateway>,
    config: ContinuationConfig,
}

impl ContinuationEngine {
    /// Create an engine over `gateway`
    pub fn new(gateway: Arc<dyn CompletionGateway>, config: ContinuationConfig) -> Self {
        Self { gateway, config }
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &ContinuationConfig {
        &self.config
    }

    /// Run to completion without observing progress
    pub async fn run(&self, system: &str, user: &str) -> Result<ContinuationOutput> {
        self.run_with_observer(system, user, &NoopObserver).await
    }

    /// Run to completion, reporting rounds and deltas to `observer`
    pub async fn run_with_observer(
        &self,
        system: &str,
        user: &str,
        observer: &dyn ContinuationObserver,
    ) -> Result<ContinuationOutput> {
        let mut conversation = Conversation::new(system, user);
        let mut text = String::new();
        let mut usage = Usage::default();
        let mut finish_reason = None;
        let mut rounds = 0u32;
        let mut retried = false;

        let stop = loop {
            if rounds >= self.config.max_loops {
                warn!(
                    rounds,
                    chars = text.len(),
                    "Continuation hit the round limit, keeping partial text"
                );
                break StopReason::MaxLoops;
            }
            if rounds > 0 && !self.config.round_delay.is_zero() {
                tokio::time::sleep(self.config.round_delay).await;
            }

            rounds += 1;
            observer.on_round_start(rounds);
            let round = self.round(&conversation, rounds, observer).await?;
            if let Some(round_usage) = &round.usage {
                usage.accumulate(round_usage);
            }
            observer.on_round_end(rounds, round.content.len(), round.finish_reason.as_ref());
            debug!(
                round = rounds,
                chars = round.content.len(),
                finish_reason = ?round.finish_reason,
                "Continuation round finished"
            );
            finish_reason = round.finish_reason;

            if round.content.is_empty() {
                if text.is_empty() && !retried {
                    warn!("First round came back empty, retrying with explicit instruction");
                    retried = true;
                    conversation.insist();
                    continue;
                }
                break StopReason::EmptyRound;
            }

            text.push_str(&round.content);
            conversation.extend(&round.content);

            if !finish_reason.as_ref().is_some_and(FinishReason::is_length) {
                break StopReason::Completed;
            }
        };

        info!(rounds, chars = text.len(), stop = ?stop, "Continuation finished");

        Ok(ContinuationOutput {
            text,
            rounds,
            finish_reason,
            stop,
            usage,
        })
    }

    async fn round(
        &self,
        conversation: &Conversation,
        number: u32,
        observer: &dyn ContinuationObserver,
    ) -> Result<Round> {
        let request = CompletionRequest::new(self.config.model.clone(), conversation.messages())
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature)
            .with_stream(self.config.streaming);

        if !self.config.streaming {
            let response = self.gateway.complete(request).await?;
            observer.on_delta(number, &response.content);
            return Ok(Round {
                content: response.content,
                finish_reason: response.finish_reason,
                usage: response.usage,
            });
        }

        let mut stream = self.gateway.stream(request).await?;
        let mut round = Round::default();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Delta { content } => {
                    observer.on_delta(number, &content);
                    round.content.push_str(&content);
                }
                StreamEvent::Finish { reason } => round.finish_reason = Some(reason),
                StreamEvent::Usage(usage) => round.usage = Some(usage),
            }
        }
        Ok(round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm::testing::{ScriptedFailure, ScriptedGateway};
    use parking_lot::Mutex;

    fn config() -> ContinuationConfig {
        ContinuationConfig {
            round_delay: Duration::ZERO,
            ..ContinuationConfig::default()
        }
    }

    fn engine(gateway: &Arc<ScriptedGateway>, config: ContinuationConfig) -> ContinuationEngine {
        ContinuationEngine::new(gateway.clone(), config)
    }

    #[tokio::test]
    async fn test_single_round() {
        let gateway = Arc::new(ScriptedGateway::new().reply("{\"a\": 1}", FinishReason::Stop));

        let output = engine(&gateway, config()).run("sys", "user").await.unwrap();
        assert_eq!(output.text, "{\"a\": 1}");
        assert_eq!(output.rounds, 1);
        assert_eq!(output.stop, StopReason::Completed);
        assert_eq!(output.finish_reason, Some(FinishReason::Stop));
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn test_prefill_grows_each_round() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply("{\"a\": ", FinishReason::Length)
                .reply("\"b\"", FinishReason::Length)
                .reply("}", FinishReason::Stop),
        );

        let output = engine(&gateway, config()).run("sys", "user").await.unwrap();
        assert_eq!(output.text, "{\"a\": \"b\"}");

        let prefills: Vec<String> = gateway
            .requests()
            .iter()
            .map(|r| r.prefill().unwrap_or_default().to_string())
            .collect();
        assert_eq!(prefills, vec!["", "{\"a\": ", "{\"a\": \"b\""]);
        assert!(gateway.requests().iter().all(|r| r.stream));
    }

    #[tokio::test]
    async fn test_non_streaming_mode() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply("ab", FinishReason::Length)
                .reply("cd", FinishReason::Stop),
        );
        let config = ContinuationConfig {
            streaming: false,
            ..config()
        };

        let output = engine(&gateway, config).run("sys", "user").await.unwrap();
        assert_eq!(output.text, "abcd");
        assert!(gateway.requests().iter().all(|r| !r.stream));
    }

    #[tokio::test]
    async fn test_empty_first_round_retries_once() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply("", FinishReason::Stop)
                .reply("{}", FinishReason::Stop),
        );

        let output = engine(&gateway, config()).run("sys", "make it").await.unwrap();
        assert_eq!(output.text, "{}");
        assert_eq!(output.rounds, 2);
        assert_eq!(output.stop, StopReason::Completed);

        let requests = gateway.requests();
        assert!(!requests[0].messages[1].content.contains(EMPTY_RETRY_INSTRUCTION));
        assert!(requests[1].messages[1].content.contains(EMPTY_RETRY_INSTRUCTION));
    }

    #[tokio::test]
    async fn test_empty_twice_is_dead_end() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply("", FinishReason::Stop)
                .reply("", FinishReason::Stop),
        );

        let output = engine(&gateway, config()).run("sys", "user").await.unwrap();
        assert!(output.text.is_empty());
        assert_eq!(output.stop, StopReason::EmptyRound);
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_later_round_stops() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply("partial", FinishReason::Length)
                .reply("", FinishReason::Length),
        );

        let output = engine(&gateway, config()).run("sys", "user").await.unwrap();
        assert_eq!(output.text, "partial");
        assert_eq!(output.stop, StopReason::EmptyRound);
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn test_gateway_error_propagates() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply("half", FinishReason::Length)
                .fail(ScriptedFailure::Transport("reset".into())),
        );

        let result = engine(&gateway, config()).run("sys", "user").await;
        assert!(result.is_err());
        assert_eq!(gateway.calls(), 2);
    }

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl ContinuationObserver for Recorder {
        fn on_round_start(&self, round: u32) {
            self.log.lock().push(format!("start {}", round));
        }

        fn on_delta(&self, _round: u32, content: &str) {
            self.log.lock().push(format!("delta {}", content));
        }

        fn on_round_end(&self, round: u32, chars: usize, _reason: Option<&FinishReason>) {
            self.log.lock().push(format!("end {} {}", round, chars));
        }
    }

    #[tokio::test]
    async fn test_observer_sees_every_delta() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply_chunks(["a", "b"], FinishReason::Length)
                .reply("c", FinishReason::Stop),
        );
        let recorder = Recorder::default();

        engine(&gateway, config())
            .run_with_observer("sys", "user", &recorder)
            .await
            .unwrap();

        assert_eq!(
            *recorder.log.lock(),
            vec![
                "start 1", "delta a", "delta b", "end 1 2", "start 2", "delta c", "end 2 1"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_delay_applies_between_rounds() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply("a", FinishReason::Length)
                .reply("b", FinishReason::Stop),
        );
        let config = ContinuationConfig {
            round_delay: Duration::from_secs(1),
            ..ContinuationConfig::default()
        };

        let started = tokio::time::Instant::now();
        engine(&gateway, config).run("sys", "user").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
