//! Generation events
//!
//! Typed, ordered notifications about a running generation: rounds starting,
//! content deltas, progress and the final outcome. The continuation engine
//! reports through [`ContinuationObserver`]; [`EventSender`] turns those
//! callbacks into a channel-backed [`GenerationEventStream`].
//!
//! Sending never blocks the producer. A full or closed channel drops the
//! event.

use crate::project::Provenance;
use futures::Stream;
use llm::FinishReason;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Event emitted while a task runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationEvent {
    /// Task this event belongs to
    pub task_id: Uuid,

    /// Type of event
    pub event_type: EventType,

    /// Sequence number for ordering events
    pub sequence: u64,

    /// Timestamp of the event
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Delta text or status line
    pub content: Option<String>,

    /// Continuation round the event belongs to
    pub round: Option<u32>,

    /// Completion percentage (0-100)
    pub progress: Option<u8>,

    /// Provenance of the final result
    pub provenance: Option<Provenance>,

    /// Error message if the event indicates failure
    pub error: Option<String>,
}

impl GenerationEvent {
    /// Create a new event
    pub fn new(task_id: Uuid, event_type: EventType, sequence: u64) -> Self {
        Self {
            task_id,
            event_type,
            sequence,
            timestamp: chrono::Utc::now(),
            content: None,
            round: None,
            progress: None,
            provenance: None,
            error: None,
        }
    }

    /// Set content
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set round number
    pub fn with_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    /// Set progress percentage
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    /// Set result provenance
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Set error message
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Type of generation event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Task started processing
    Started,

    /// A continuation round started
    RoundStarted,

    /// Content received from the model
    Delta,

    /// A continuation round finished
    RoundFinished,

    /// Progress update
    Progress,

    /// General status update
    Status,

    /// Task completed with a result
    Completed,

    /// Task failed
    Failed,
}

/// Stream of generation events
pub type GenerationEventStream = Pin<Box<dyn Stream<Item = GenerationEvent> + Send>>;

/// Callbacks from the continuation engine.
///
/// All methods default to no-ops and must not block.
pub trait ContinuationObserver: Send + Sync {
    /// Round `round` (1-based) is about to call the gateway
    fn on_round_start(&self, _round: u32) {}

    /// A content delta arrived during `round`
    fn on_delta(&self, _round: u32, _content: &str) {}

    /// Round `round` produced `chars` characters and stopped for `finish_reason`
    fn on_round_end(&self, _round: u32, _chars: usize, _finish_reason: Option<&FinishReason>) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ContinuationObserver for NoopObserver {}

/// Builder for generation event streams
pub struct StreamBuilder {
    /// Task ID for the stream
    task_id: Uuid,

    /// Buffer size for the event channel
    buffer_size: usize,

    /// Whether to include delta events
    include_deltas: bool,
}

impl StreamBuilder {
    /// Create a new stream builder
    pub fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            buffer_size: 256,
            include_deltas: true,
        }
    }

    /// Set buffer size for the event channel
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Set whether to include delta events
    pub fn include_deltas(mut self, include: bool) -> Self {
        self.include_deltas = include;
        self
    }

    /// Build the sender/stream pair
    pub fn build(self) -> (EventSender, GenerationEventStream) {
        let (tx, rx) = mpsc::channel(self.buffer_size);

        let sender = EventSender {
            task_id: self.task_id,
            tx,
            sequence: AtomicU64::new(0),
            include_deltas: self.include_deltas,
        };

        let stream = Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx));

        (sender, stream)
    }
}

/// Sending half of a generation event stream
#[derive(Debug)]
pub struct EventSender {
    task_id: Uuid,
    tx: mpsc::Sender<GenerationEvent>,
    sequence: AtomicU64,
    include_deltas: bool,
}

impl EventSender {
    fn next(&self, event_type: EventType) -> GenerationEvent {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        GenerationEvent::new(self.task_id, event_type, sequence)
    }

    fn send(&self, event: GenerationEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!(task_id = %self.task_id, "Generation event dropped: {}", e);
        }
    }

    /// Send a started event
    pub fn started(&self) {
        self.send(self.next(EventType::Started));
    }

    /// Send a progress event
    pub fn progress(&self, percentage: u8) {
        self.send(self.next(EventType::Progress).with_progress(percentage));
    }

    /// Send a status event
    pub fn status(&self, message: impl Into<String>) {
        self.send(self.next(EventType::Status).with_content(message));
    }

    /// Send a completed event
    pub fn completed(&self, provenance: Provenance) {
        self.send(
            self.next(EventType::Completed)
                .with_progress(100)
                .with_provenance(provenance),
        );
    }

    /// Send a failed event
    pub fn failed(&self, error: impl Into<String>) {
        self.send(self.next(EventType::Failed).with_error(error));
    }

    /// Check if the receiver is still active
    pub fn is_active(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Get current sequence number
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl ContinuationObserver for EventSender {
    fn on_round_start(&self, round: u32) {
        self.send(self.next(EventType::RoundStarted).with_round(round));
    }

    fn on_delta(&self, round: u32, content: &str) {
        if !self.include_deltas || content.is_empty() {
            return;
        }
        self.send(
            self.next(EventType::Delta)
                .with_round(round)
                .with_content(content),
        );
    }

    fn on_round_end(&self, round: u32, _chars: usize, finish_reason: Option<&FinishReason>) {
        let mut event = self.next(EventType::RoundFinished).with_round(round);
        if let Some(reason) = finish_reason {
            event = event.with_content(reason.as_str());
        }
        self.send(event);
    }
}
