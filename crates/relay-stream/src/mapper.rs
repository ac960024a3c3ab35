use relay_core::event::{InternalEvent, MessageDelta};

use crate::wire::WireEvent;

/// Maps one internal event to the wire events it produces.
///
/// Pure and total. `turn_start`, `message_start` and `message_end` have no
/// wire form. Both `toolcall_end` and `tool_execution_start` produce a
/// `tool_use`; receivers keep the first one per tool call id.
pub fn map_event(event: &InternalEvent) -> Vec<WireEvent> {
    match event {
        InternalEvent::AgentStart => vec![WireEvent::AgentStart { session_id: None }],
        InternalEvent::AgentEnd { messages } => vec![WireEvent::Complete {
            messages: messages.clone(),
        }],
        InternalEvent::TurnStart | InternalEvent::MessageStart | InternalEvent::MessageEnd => {
            vec![]
        }
        InternalEvent::TurnEnd => vec![WireEvent::TurnEnd],
        InternalEvent::MessageUpdate { event } => match event {
            MessageDelta::TextDelta { delta } => vec![WireEvent::Content {
                text: delta.clone(),
            }],
            MessageDelta::ThinkingDelta { delta } => vec![WireEvent::Thinking {
                text: delta.clone(),
            }],
            MessageDelta::ToolcallEnd { tool_call } => vec![WireEvent::ToolUse {
                tool_call_id: tool_call.id.clone(),
                tool_name: tool_call.name.clone(),
                tool_input: tool_call.args(),
            }],
            MessageDelta::Error { error_message } => vec![WireEvent::Error {
                message: error_message.clone(),
            }],
        },
        InternalEvent::ToolExecutionStart {
            tool_call_id,
            tool_name,
            args,
        } => vec![WireEvent::ToolUse {
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.clone(),
            tool_input: args.clone(),
        }],
        InternalEvent::ToolExecutionUpdate {
            tool_call_id,
            tool_name,
            partial_result,
        } => vec![WireEvent::ToolUpdate {
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.clone(),
            content: partial_result.text(),
        }],
        InternalEvent::ToolExecutionEnd {
            tool_call_id,
            tool_name,
            result,
            is_error,
        } => vec![WireEvent::ToolResult {
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.clone(),
            content: result.text(),
            is_error: *is_error,
        }],
    }
}
