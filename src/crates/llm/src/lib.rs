//! Completion gateway boundary for the project generator.
//!
//! This crate defines the narrow interface the generator needs from a large
//! language model: send an ordered list of role-tagged turns, get back either
//! a full message or a stream of typed deltas, and learn why the model
//! stopped (`finish_reason`) and how many tokens it used.
//!
//! # Implementations
//!
//! - [`remote::OpenAiCompatibleClient`] - any `/chat/completions` endpoint
//!   (OpenAI, Deepseek, OpenRouter, self-hosted servers)
//! - [`testing::ScriptedGateway`] - replays a fixed script, for tests
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use llm::remote::OpenAiCompatibleClient;
//! use llm::{CompletionGateway, CompletionRequest, Message, RemoteLlmConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RemoteLlmConfig::from_env(
//!         "OPENAI_API_KEY",
//!         "https://api.openai.com/v1",
//!         "gpt-4o",
//!     )?;
//!     let client = OpenAiCompatibleClient::new(config)?;
//!
//!     let request = CompletionRequest::new("gpt-4o", vec![
//!         Message::system("You are a helpful assistant"),
//!         Message::user("What is Rust?"),
//!     ])
//!     .with_max_tokens(1024);
//!
//!     let response = client.complete(request).await?;
//!     println!("{} ({:?})", response.content, response.finish_reason);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod message;
pub mod testing;

#[cfg(feature = "remote")]
pub mod remote;

// Re-export commonly used types
pub use config::RemoteLlmConfig;
pub use error::{LlmError, Result};
pub use gateway::{
    CompletionGateway, CompletionRequest, CompletionResponse, CompletionStream, FinishReason,
    StreamEvent, Usage,
};
pub use message::{Message, Role};
