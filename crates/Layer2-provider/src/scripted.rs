//! Scripted provider for tests
//!
//! Replays a fixed queue of responses and records every request it sees.

use crate::{
    error::ProviderError, r#trait::ProviderResponse, Message, Provider, ToolCall, ToolDef,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A request captured by [`ScriptedProvider`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub system_prompt: Option<String>,
}

pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    fallback: Option<ProviderResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            queue: Mutex::new(responses.into_iter().map(Ok).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Provider that always answers with the given text
    pub fn always_text(text: impl Into<String>) -> Self {
        Self::new(vec![]).repeating(ProviderResponse::text(text))
    }

    /// Response returned once the queue is exhausted
    pub fn repeating(mut self, response: ProviderResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Queue an error
    pub fn then_error(self, error: ProviderError) -> Self {
        self.queue.lock().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Convenience for building a tool-call response
    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ProviderResponse {
        ProviderResponse::with_tool_calls("", vec![ToolCall::new(id, name, arguments)])
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDef>,
        system_prompt: Option<String>,
    ) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().push(RecordedRequest {
            messages,
            tool_names: tools.into_iter().map(|t| t.name).collect(),
            system_prompt,
        });

        if let Some(next) = self.queue.lock().pop_front() {
            return next;
        }
        Ok(self
            .fallback
            .clone()
            .unwrap_or_else(|| ProviderResponse::text("")))
    }
}
