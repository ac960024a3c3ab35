use async_trait::async_trait;
use std::sync::Arc;

use crate::error::RelayError;
use crate::message::Message;
use crate::tool::{ToolCall, ToolResult};

/// Lifecycle and content events emitted by an agent runtime while it
/// executes one turn sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum InternalEvent {
    AgentStart,
    AgentEnd {
        messages: Vec<Message>,
    },
    TurnStart,
    TurnEnd,
    MessageStart,
    MessageEnd,
    MessageUpdate {
        event: MessageDelta,
    },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolExecutionUpdate {
        tool_call_id: String,
        tool_name: String,
        partial_result: ToolResult,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: ToolResult,
        is_error: bool,
    },
}

/// Sub-events of a streaming assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageDelta {
    TextDelta { delta: String },
    ThinkingDelta { delta: String },
    ToolcallEnd { tool_call: ToolCall },
    Error { error_message: String },
}

impl InternalEvent {
    pub fn text(delta: impl Into<String>) -> Self {
        Self::MessageUpdate {
            event: MessageDelta::TextDelta {
                delta: delta.into(),
            },
        }
    }

    pub fn thinking(delta: impl Into<String>) -> Self {
        Self::MessageUpdate {
            event: MessageDelta::ThinkingDelta {
                delta: delta.into(),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentStart => "agent_start",
            Self::AgentEnd { .. } => "agent_end",
            Self::TurnStart => "turn_start",
            Self::TurnEnd => "turn_end",
            Self::MessageStart => "message_start",
            Self::MessageEnd => "message_end",
            Self::MessageUpdate { .. } => "message_update",
            Self::ToolExecutionStart { .. } => "tool_execution_start",
            Self::ToolExecutionUpdate { .. } => "tool_execution_update",
            Self::ToolExecutionEnd { .. } => "tool_execution_end",
        }
    }
}

/// Receives internal events in emission order. The source awaits `emit`
/// before producing the next event.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: InternalEvent);
}

/// An agent runtime driving one turn sequence.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn subscribe(&self, sink: Arc<dyn EventSink>);

    /// Runs the sequence to completion. Returns `RelayError::Cancelled`
    /// after `abort`.
    async fn prompt(&self, text: String) -> Result<(), RelayError>;

    /// Cooperative: checked between tokens and between tool executions.
    fn abort(&self);
}
