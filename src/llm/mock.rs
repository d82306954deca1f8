//! Scripted `LLMProvider` for tests, grounded on the teacher's `MockProvider`
//! in `llm/retry.rs` (a `Vec` of canned results plus an atomic call counter).

use super::provider::{LLMError, LLMProvider, LLMResult, ModelInfo};
use super::types::{ChatCompletionRequest, ChatCompletionResponse, Role};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct MockChatProvider {
    responses: Mutex<Vec<LLMResult<ChatCompletionResponse>>>,
    call_count: AtomicUsize,
    supports_vision: bool,
}

impl MockChatProvider {
    pub fn new(responses: Vec<LLMResult<ChatCompletionResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: AtomicUsize::new(0),
            supports_vision: false,
        }
    }

    pub fn with_vision(mut self) -> Self {
        self.supports_vision = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

pub fn json_response(content: impl Into<String>) -> ChatCompletionResponse {
    ChatCompletionResponse {
        content: content.into(),
        role: Role::Assistant,
        model: "mock-model".to_string(),
        usage: None,
    }
}

#[async_trait]
impl LLMProvider for MockChatProvider {
    async fn create_chat_completion(&self, _request: ChatCompletionRequest) -> LLMResult<ChatCompletionResponse> {
        let index = self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if index >= responses.len() {
            return Err(LLMError::Other("mock exhausted".to_string()));
        }
        std::mem::replace(&mut responses[index], Err(LLMError::Other("consumed".to_string())))
    }

    fn supports_vision(&self) -> bool {
        self.supports_vision
    }

    async fn get_available_models(&self) -> LLMResult<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            name: "mock-model".to_string(),
            supports_vision: self.supports_vision,
            supports_json_mode: true,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;

    #[tokio::test]
    async fn replays_scripted_responses_in_order() {
        let provider = MockChatProvider::new(vec![
            Ok(json_response("first")),
            Ok(json_response("second")),
        ]);

        let request = ChatCompletionRequest::new("mock-model", vec![ChatMessage::user("hi")]);
        let first = provider.create_chat_completion(request.clone()).await.unwrap();
        let second = provider.create_chat_completion(request).await.unwrap();

        assert_eq!(first.content, "first");
        assert_eq!(second.content, "second");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_returns_error() {
        let provider = MockChatProvider::new(vec![]);
        let request = ChatCompletionRequest::new("mock-model", vec![ChatMessage::user("hi")]);
        let result = provider.create_chat_completion(request).await;
        assert!(result.is_err());
    }
}
