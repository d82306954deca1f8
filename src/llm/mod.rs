//! Uniform LLM chat-completion interface with optional vision, spec.md §4.6.
//!
//! Grounded on the teacher's `llm::types`/`llm::provider` (`ChatMessage`,
//! `Role`, `MessageContent`, `ContentPart`, `LLMProvider`), reused almost
//! verbatim since multimodal chat messages are exactly what this spec's
//! vision-capable discovery strategy needs.

mod provider;
mod types;

#[cfg(test)]
pub mod mock;

pub use provider::{LLMError, LLMProvider, LLMResult, ModelInfo};
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ContentPart, ImageDetail, ImageUrl,
    MessageContent, ResponseFormat, Role, Usage,
};
