//! Orchestrator
//!
//! Entry point for callers. A request becomes a ledger task and a background
//! future; the caller gets the task id back at once and polls it.
//!
//! Every task ends `completed` with a deliverable project unless the
//! fallback path itself breaks:
//! - gateway failures and empty output fall back to a template
//! - output that parses but lacks required files is completed from the
//!   template
//! - a panic while producing is caught and answered with the template

use crate::config::GeneratorConfig;
use crate::executor::events::{ContinuationObserver, EventSender, GenerationEventStream, StreamBuilder};
use crate::executor::{prompt, ContinuationEngine, ContinuationOutput, StopReason};
use crate::fallback::FallbackSynthesizer;
use crate::ledger::TaskLedger;
use crate::project::{FileMap, GenerationResult, Provenance};
use crate::task::{TaskKind, TaskPatch, TaskSnapshot, TaskStatus};
use crate::validator::CodeValidator;
use crate::{GeneratorError, Result};
use futures::FutureExt;
use llm::{CompletionGateway, FinishReason};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Progress reported when work starts
const PROGRESS_STARTED: u8 = 5;
/// Progress reported when the first round starts
const PROGRESS_GENERATING: u8 = 10;
/// Ceiling while content is still streaming in
const PROGRESS_STREAM_CAP: u8 = 85;
/// Progress reported while validating
const PROGRESS_VALIDATING: u8 = 90;
/// Generated characters at which streaming progress is halfway to its cap
const PROGRESS_HALF_CHARS: usize = 8_000;

/// What a caller asks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GenerationRequest {
    /// Build a new project
    Generate { description: String },
    /// Change an existing project
    Modify { instruction: String, files: FileMap },
}

impl GenerationRequest {
    pub fn generate(description: impl Into<String>) -> Self {
        GenerationRequest::Generate {
            description: description.into(),
        }
    }

    pub fn modify(instruction: impl Into<String>, files: FileMap) -> Self {
        GenerationRequest::Modify {
            instruction: instruction.into(),
            files,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            GenerationRequest::Generate { .. } => TaskKind::Generate,
            GenerationRequest::Modify { .. } => TaskKind::Modify,
        }
    }

    /// Description or instruction text
    pub fn description(&self) -> &str {
        match self {
            GenerationRequest::Generate { description } => description,
            GenerationRequest::Modify { instruction, .. } => instruction,
        }
    }
}

/// Runs generation requests in the background and tracks them in a ledger.
///
/// Cheap to clone; clones share the ledger and pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Pipeline>,
}

struct Pipeline {
    ledger: Arc<TaskLedger>,
    sweeper: Option<JoinHandle<()>>,
    engine: ContinuationEngine,
    validator: CodeValidator,
    fallback: FallbackSynthesizer,
    system_prompt: Option<String>,
}

impl Orchestrator {
    /// Create an orchestrator with its own ledger
    pub fn new(gateway: Arc<dyn CompletionGateway>, config: &GeneratorConfig) -> Self {
        let ledger = Arc::new(TaskLedger::with_config(config.ledger()));
        Self::with_ledger(gateway, config, ledger)
    }

    /// Create an orchestrator over a shared ledger.
    ///
    /// Inside a Tokio runtime this also starts the ledger's periodic sweep,
    /// which stops once the orchestrator and its in-flight tasks are gone.
    pub fn with_ledger(
        gateway: Arc<dyn CompletionGateway>,
        config: &GeneratorConfig,
        ledger: Arc<TaskLedger>,
    ) -> Self {
        let sweeper = match Handle::try_current() {
            Ok(_) => Some(ledger.spawn_sweeper()),
            Err(_) => {
                warn!("No Tokio runtime, ledger sweep disabled");
                None
            }
        };

        Self {
            inner: Arc::new(Pipeline {
                ledger,
                sweeper,
                engine: ContinuationEngine::new(gateway, config.continuation()),
                validator: CodeValidator::new(),
                fallback: FallbackSynthesizer::new(),
                system_prompt: config.system_prompt.clone(),
            }),
        }
    }

    pub fn ledger(&self) -> &Arc<TaskLedger> {
        &self.inner.ledger
    }

    /// Whether the periodic ledger sweep is running
    pub fn is_sweeping(&self) -> bool {
        self.inner
            .sweeper
            .as_ref()
            .is_some_and(|sweeper| !sweeper.is_finished())
    }

    /// Queue `request` and return its task id immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, request: GenerationRequest) -> Uuid {
        let id = self.inner.ledger.create(request.kind(), request.description());
        info!(task_id = %id, kind = %request.kind(), "Task submitted");

        tokio::spawn(Arc::clone(&self.inner).run(id, request, None));
        id
    }

    /// Like [`submit`](Self::submit), also returning a stream of generation
    /// events that ends when the task does.
    pub fn submit_with_events(&self, request: GenerationRequest) -> (Uuid, GenerationEventStream) {
        let id = self.inner.ledger.create(request.kind(), request.description());
        info!(task_id = %id, kind = %request.kind(), "Task submitted with event stream");

        let (sender, stream) = StreamBuilder::new(id).build();
        tokio::spawn(Arc::clone(&self.inner).run(id, request, Some(sender)));
        (id, stream)
    }

    /// Current view of a task
    pub fn poll(&self, id: Uuid) -> Option<TaskSnapshot> {
        self.inner.ledger.get(id).map(|task| task.snapshot())
    }

    /// Poll `id` every `interval` until it reaches a terminal state.
    ///
    /// Fails with [`GeneratorError::TaskNotFound`] if the task is unknown or
    /// is deleted while waiting.
    pub async fn wait(&self, id: Uuid, interval: Duration) -> Result<TaskSnapshot> {
        loop {
            let snapshot = self
                .poll(id)
                .ok_or_else(|| GeneratorError::TaskNotFound(id.to_string()))?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            debug!(task_id = %id, progress = snapshot.progress, "{}", snapshot.message);
            tokio::time::sleep(interval).await;
        }
    }

    /// Forget a task. In-flight work keeps running but its result is dropped.
    pub fn delete(&self, id: Uuid) -> bool {
        self.inner.ledger.delete(id)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl Pipeline {
    async fn run(self: Arc<Self>, id: Uuid, request: GenerationRequest, events: Option<EventSender>) {
        self.ledger.update(
            id,
            TaskStatus::Processing,
            TaskPatch::new()
                .progress(PROGRESS_STARTED)
                .message("Preparing request"),
        );
        if let Some(events) = &events {
            events.started();
        }

        let observer = ProgressObserver::new(&self.ledger, id, events.as_ref());
        let produced = AssertUnwindSafe(self.produce(&request, &observer))
            .catch_unwind()
            .await;

        let result = match produced {
            Ok(result) => Some(result),
            Err(panic) => {
                error!(task_id = %id, panic = panic_message(panic.as_ref()), "Generation panicked, using fallback");
                let note = "template used because generation failed unexpectedly";
                std::panic::catch_unwind(AssertUnwindSafe(|| self.fallback_for(&request, note)))
                    .map_err(|panic| {
                        error!(task_id = %id, panic = panic_message(panic.as_ref()), "Fallback panicked");
                    })
                    .ok()
            }
        };

        match result {
            Some(result) => {
                let provenance = result.provenance;
                let message = match provenance {
                    Provenance::Model => "Project generated",
                    Provenance::Repaired => "Project generated with repairs",
                    Provenance::Fallback => "Project generated from template",
                };
                info!(
                    task_id = %id,
                    provenance = %provenance,
                    files = result.files.len(),
                    rounds = result.rounds,
                    "Task completed"
                );
                self.ledger.update(
                    id,
                    TaskStatus::Completed,
                    TaskPatch::new().message(message).payload(result),
                );
                if let Some(events) = &events {
                    events.completed(provenance);
                }
            }
            None => {
                let error = "generation and fallback both failed";
                self.ledger.update(
                    id,
                    TaskStatus::Failed,
                    TaskPatch::new().message("Generation failed").error(error),
                );
                if let Some(events) = &events {
                    events.failed(error);
                }
            }
        }
    }

    async fn produce(&self, request: &GenerationRequest, observer: &ProgressObserver<'_>) -> GenerationResult {
        match request {
            GenerationRequest::Generate { description } => self.generate(description, observer).await,
            GenerationRequest::Modify { instruction, files } => {
                self.modify(instruction, files, observer).await
            }
        }
    }

    async fn generate(&self, description: &str, observer: &ProgressObserver<'_>) -> GenerationResult {
        let system = self
            .system_prompt
            .clone()
            .unwrap_or_else(prompt::generate_system_prompt);
        let user = prompt::generate_user_prompt(description);

        let output = match self.engine.run_with_observer(&system, &user, observer).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "Gateway failed, using fallback");
                return self
                    .fallback
                    .generate(description)
                    .with_note(format!("template used because the model was unreachable: {}", e));
            }
        };

        if output.text.trim().is_empty() {
            warn!(rounds = output.rounds, "Model returned no content, using fallback");
            return with_output_stats(self.fallback.generate(description), &output)
                .with_note("template used because the model returned no content");
        }

        observer.validating();
        let outcome = self.validator.validate(&output.text);

        let result = match (outcome.valid, outcome.parsed) {
            (true, Some(files)) => {
                let provenance = if outcome.repaired {
                    Provenance::Repaired
                } else {
                    Provenance::Model
                };
                GenerationResult::new(files, provenance)
            }
            (_, Some(files)) if !files.is_empty() => {
                let (files, added) = self.fallback.complete_missing(files, description);
                info!(added = ?added, "Filled missing artifacts from template");
                GenerationResult::new(files, Provenance::Repaired)
                    .with_note(format!("template used for: {}", added.join(", ")))
            }
            _ => {
                let reason = outcome.error.unwrap_or_else(|| "unknown".to_string());
                warn!(error = %reason, "Model output unusable, using fallback");
                self.fallback
                    .generate(description)
                    .with_note(format!("template used because the model output was unusable: {}", reason))
            }
        };

        with_output_stats(result, &output)
    }

    async fn modify(
        &self,
        instruction: &str,
        current: &FileMap,
        observer: &ProgressObserver<'_>,
    ) -> GenerationResult {
        let system = prompt::modify_system_prompt();
        let user = prompt::modify_user_prompt(instruction, current);

        let output = match self.engine.run_with_observer(&system, &user, observer).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "Gateway failed, returning current files");
                return self.unchanged(
                    current,
                    instruction,
                    &format!("files left unchanged because the model was unreachable: {}", e),
                );
            }
        };

        observer.validating();
        let outcome = self.validator.validate(&output.text);
        let changes = match outcome.parsed {
            Some(changes) if !changes.is_empty() => changes,
            _ => {
                let reason = outcome.error.unwrap_or_else(|| "no content".to_string());
                warn!(error = %reason, "Modification unusable, returning current files");
                let result = self.unchanged(
                    current,
                    instruction,
                    &format!("files left unchanged because the model output was unusable: {}", reason),
                );
                return with_output_stats(result, &output);
            }
        };

        debug!(changed = changes.len(), "Overlaying modified files");
        let mut merged = current.clone();
        merged.extend(changes);

        let result = if self.validator.check_completeness(&merged).is_ok() {
            let provenance = if outcome.repaired {
                Provenance::Repaired
            } else {
                Provenance::Model
            };
            GenerationResult::new(merged, provenance)
        } else {
            let (merged, added) = self.fallback.complete_missing(merged, instruction);
            GenerationResult::new(merged, Provenance::Repaired)
                .with_note(format!("template used for: {}", added.join(", ")))
        };

        with_output_stats(result, &output)
    }

    /// Current files if they are deliverable, a template otherwise
    fn unchanged(&self, current: &FileMap, instruction: &str, note: &str) -> GenerationResult {
        if self.validator.check_completeness(current).is_ok() {
            GenerationResult::new(current.clone(), Provenance::Fallback).with_note(note)
        } else {
            self.fallback.generate(instruction).with_note(note)
        }
    }

    fn fallback_for(&self, request: &GenerationRequest, note: &str) -> GenerationResult {
        match request {
            GenerationRequest::Generate { description } => {
                self.fallback.generate(description).with_note(note)
            }
            GenerationRequest::Modify { instruction, files } => {
                self.unchanged(files, instruction, note)
            }
        }
    }
}

fn with_output_stats(result: GenerationResult, output: &ContinuationOutput) -> GenerationResult {
    let result = result.with_rounds(output.rounds).with_usage(output.usage);
    if output.stop == StopReason::MaxLoops {
        result.with_note("output hit the round limit and may be truncated")
    } else {
        result
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Writes advisory progress into the ledger and forwards engine callbacks to
/// an optional event stream.
struct ProgressObserver<'a> {
    ledger: &'a TaskLedger,
    task_id: Uuid,
    events: Option<&'a EventSender>,
    chars: AtomicUsize,
    progress: AtomicU8,
    /// Set once the ledger stops accepting updates for the task
    detached: AtomicBool,
}

impl<'a> ProgressObserver<'a> {
    fn new(ledger: &'a TaskLedger, task_id: Uuid, events: Option<&'a EventSender>) -> Self {
        Self {
            ledger,
            task_id,
            events,
            chars: AtomicUsize::new(0),
            progress: AtomicU8::new(PROGRESS_STARTED),
            detached: AtomicBool::new(false),
        }
    }

    fn report(&self, progress: u8, message: Option<String>) {
        let previous = self.progress.fetch_max(progress, Ordering::Relaxed);
        let advanced = progress > previous;
        if !advanced && message.is_none() {
            return;
        }

        if advanced {
            if let Some(events) = self.events {
                events.progress(progress);
            }
        }

        if self.detached.load(Ordering::Relaxed) {
            return;
        }
        let mut patch = TaskPatch::new().progress(progress.max(previous));
        if let Some(message) = message {
            patch = patch.message(message);
        }
        if !self.ledger.update(self.task_id, TaskStatus::Processing, patch) {
            self.detached.store(true, Ordering::Relaxed);
        }
    }

    fn validating(&self) {
        self.report(PROGRESS_VALIDATING, Some("Validating output".to_string()));
    }
}

impl ContinuationObserver for ProgressObserver<'_> {
    fn on_round_start(&self, round: u32) {
        if let Some(events) = self.events {
            events.on_round_start(round);
        }
        self.report(
            PROGRESS_GENERATING,
            Some(format!("Generating project (round {})", round)),
        );
    }

    fn on_delta(&self, round: u32, content: &str) {
        if let Some(events) = self.events {
            events.on_delta(round, content);
        }
        let chars = self.chars.fetch_add(content.len(), Ordering::Relaxed) + content.len();
        let span = usize::from(PROGRESS_STREAM_CAP - PROGRESS_GENERATING);
        let gained = span * chars / (chars + PROGRESS_HALF_CHARS);
        self.report(PROGRESS_GENERATING + gained as u8, None);
    }

    fn on_round_end(&self, round: u32, chars: usize, finish_reason: Option<&FinishReason>) {
        if let Some(events) = self.events {
            events.on_round_end(round, chars, finish_reason);
        }
    }
}
