//! Completion Engine - the model-call / tool-execute loop
//!
//! Each round calls the model with the full history. A response without tool
//! calls ends the run. Otherwise every requested tool is executed in order and
//! its result (or error text) goes back into the history. Tool failures never
//! abort the loop; only provider errors do.

use async_trait::async_trait;
use crew_foundation::{Result, DEFAULT_MAX_ITERATIONS};
use crew_provider::{
    with_retry, Message, Provider, RetryConfig, TokenUsage, ToolCall, ToolDef,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A tool the model may call
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDef;

    /// Arguments have already been checked against `definition()`
    async fn execute(&self, arguments: Value) -> Result<String>;
}

/// Events emitted during a completion run
#[derive(Debug, Clone)]
pub enum CompletionEvent {
    RoundStarted {
        round: usize,
    },

    ToolStarted {
        tool_name: String,
        tool_call_id: String,
    },

    ToolFinished {
        tool_name: String,
        tool_call_id: String,
        result: String,
        is_error: bool,
    },

    Done {
        content: String,
        rounds: usize,
    },
}

/// One executed tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
    pub result: String,
    pub is_error: bool,
}

#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    /// Text of the last model response
    pub content: String,
    /// Input history plus everything produced during the run
    pub messages: Vec<Message>,
    /// Index into `messages` where this run's messages begin
    pub new_messages_from: usize,
    pub rounds: usize,
    pub invocations: Vec<ToolInvocation>,
    /// The run stopped because it hit the iteration cap, not because the
    /// model stopped asking for tools
    pub hit_iteration_cap: bool,
    pub usage: TokenUsage,
}

impl CompletionOutcome {
    pub fn new_messages(&self) -> &[Message] {
        &self.messages[self.new_messages_from..]
    }

    pub fn tool_call_count(&self) -> usize {
        self.invocations.len()
    }
}

pub struct CompletionEngine {
    provider: Arc<dyn Provider>,
    max_iterations: usize,
    retry: RetryConfig,
    events: Option<mpsc::Sender<CompletionEvent>>,
}

impl CompletionEngine {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            retry: RetryConfig::default(),
            events: None,
        }
    }

    /// Upper bound on model calls per run
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_events(mut self, tx: mpsc::Sender<CompletionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run the loop until the model answers without tool calls or the
    /// iteration cap is reached
    pub async fn complete(
        &self,
        mut messages: Vec<Message>,
        system_prompt: Option<String>,
        tools: &[Arc<dyn ToolHandler>],
    ) -> Result<CompletionOutcome> {
        let new_messages_from = messages.len();
        let definitions: Vec<ToolDef> = tools.iter().map(|t| t.definition()).collect();
        let by_name: HashMap<String, (&Arc<dyn ToolHandler>, &ToolDef)> = tools
            .iter()
            .zip(definitions.iter())
            .map(|(handler, def)| (def.name.clone(), (handler, def)))
            .collect();

        let mut invocations = Vec::new();
        let mut usage = TokenUsage::default();
        let mut rounds = 0;

        loop {
            rounds += 1;
            self.emit(CompletionEvent::RoundStarted { round: rounds }).await;
            debug!(round = rounds, model = self.provider.model(), "Completion round");

            let response = with_retry(&self.retry, "completion", || {
                self.provider.complete(
                    messages.clone(),
                    definitions.clone(),
                    system_prompt.clone(),
                )
            })
            .await?;
            usage.add(&response.usage);

            if !response.has_tool_calls() {
                messages.push(Message::assistant(&response.content));
                info!(rounds, tool_calls = invocations.len(), "Completion finished");
                self.emit(CompletionEvent::Done {
                    content: response.content.clone(),
                    rounds,
                })
                .await;
                return Ok(CompletionOutcome {
                    content: response.content,
                    messages,
                    new_messages_from,
                    rounds,
                    invocations,
                    hit_iteration_cap: false,
                    usage,
                });
            }

            messages.push(Message::assistant_with_tools(
                &response.content,
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                let (result, is_error) = self.invoke(&by_name, call).await;
                messages.push(Message::tool_result(&call.id, &result, is_error));
                invocations.push(ToolInvocation {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result,
                    is_error,
                });
            }

            if rounds >= self.max_iterations {
                warn!(rounds, "Max iterations reached");
                self.emit(CompletionEvent::Done {
                    content: response.content.clone(),
                    rounds,
                })
                .await;
                return Ok(CompletionOutcome {
                    content: response.content,
                    messages,
                    new_messages_from,
                    rounds,
                    invocations,
                    hit_iteration_cap: true,
                    usage,
                });
            }
        }
    }

    /// Execute one tool call; every failure becomes result text
    async fn invoke(
        &self,
        by_name: &HashMap<String, (&Arc<dyn ToolHandler>, &ToolDef)>,
        call: &ToolCall,
    ) -> (String, bool) {
        self.emit(CompletionEvent::ToolStarted {
            tool_name: call.name.clone(),
            tool_call_id: call.id.clone(),
        })
        .await;
        info!("Executing tool: {}", call.name);

        let (result, is_error) = match by_name.get(&call.name) {
            None => (format!("Unknown tool: {}", call.name), true),
            Some((handler, def)) => match def.validate_arguments(&call.arguments) {
                Err(reason) => (format!("Error: invalid arguments: {}", reason), true),
                Ok(()) => match handler.execute(call.arguments.clone()).await {
                    Ok(output) => (output, false),
                    Err(e) => (format!("Error: {}", e), true),
                },
            },
        };

        if is_error {
            debug!(tool = %call.name, result = %result, "Tool returned an error");
        }
        self.emit(CompletionEvent::ToolFinished {
            tool_name: call.name.clone(),
            tool_call_id: call.id.clone(),
            result: result.clone(),
            is_error,
        })
        .await;

        (result, is_error)
    }

    async fn emit(&self, event: CompletionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}
