//! Generation execution
//!
//! The continuation engine, its event model and the built-in prompts.

pub mod continuation;
pub mod events;
pub mod prompt;

pub use continuation::{ContinuationConfig, ContinuationEngine, ContinuationOutput, StopReason};
pub use events::{
    ContinuationObserver, EventSender, EventType, GenerationEvent, GenerationEventStream,
    NoopObserver, StreamBuilder,
};
