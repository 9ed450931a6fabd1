//! Remote completion service implementations.
//!
//! Every provider reachable through the OpenAI chat completions dialect
//! (OpenAI, Deepseek, OpenRouter, Moonshot, vLLM, LM Studio in server mode)
//! is served by [`OpenAiCompatibleClient`]; point `base_url` at the provider.

pub mod openai;

pub use openai::OpenAiCompatibleClient;
