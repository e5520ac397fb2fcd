//! # crew-provider
//!
//! LLM provider abstraction layer for crew.
//!
//! ## Features
//! - Chat-completions request/response with tool calling
//! - Tool definitions with JSON-schema argument validation
//! - Automatic retry with exponential backoff
//! - OpenAI-compatible provider (any endpoint speaking the chat completions API)

pub mod error;
pub mod message;
pub mod providers;
pub mod retry;
pub mod tool_def;
pub mod r#trait;

#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

// Core traits and types
pub use message::{Message, MessageRole, ToolCall, ToolResult};
pub use r#trait::{FinishReason, Provider, ProviderResponse, TokenUsage};
pub use tool_def::{ToolDef, ToolParameters};

// Error and retry
pub use error::ProviderError;
pub use retry::{with_retry, RetryConfig};

// Provider implementations
pub use providers::openai::OpenAiProvider;

#[cfg(any(test, feature = "test-util"))]
pub use scripted::ScriptedProvider;
