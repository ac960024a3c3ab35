use relay_core::message::Message;
use serde::{Deserialize, Serialize};

/// The only contract crossing the transport boundary.
///
/// For one tool call the order is `tool_use`, any number of `tool_update`,
/// then exactly one `tool_result`. A stream ends with exactly one
/// `complete` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    AgentStart {
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Content {
        text: String,
    },
    Thinking {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolUse {
        tool_call_id: String,
        tool_name: String,
        tool_input: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolUpdate {
        tool_call_id: String,
        tool_name: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
    TurnEnd,
    Complete {
        #[serde(default)]
        messages: Vec<Message>,
    },
    Error {
        message: String,
    },
    DocUpdate(DocUpdate),
}

impl WireEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentStart { .. } => "agent_start",
            Self::Content { .. } => "content",
            Self::Thinking { .. } => "thinking",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolUpdate { .. } => "tool_update",
            Self::ToolResult { .. } => "tool_result",
            Self::TurnEnd => "turn_end",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::DocUpdate(_) => "doc_update",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocOperation {
    ClearAll,
    Append,
    Replace,
    Delete,
    Insert,
    InsertImage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagePosition {
    BeforeSection,
    #[default]
    AfterSection,
}

/// Payload of a `doc_update` event: one applied document mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocUpdate {
    pub operation: DocOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<ImagePosition>,
}

impl DocUpdate {
    fn op(operation: DocOperation) -> Self {
        Self {
            operation,
            section_index: None,
            title: None,
            content: None,
            image_url: None,
            image_description: None,
            position: None,
        }
    }

    fn section(operation: DocOperation, index: usize, title: &str, content: &str) -> Self {
        Self {
            section_index: Some(index),
            title: Some(title.to_string()),
            content: Some(content.to_string()),
            ..Self::op(operation)
        }
    }

    pub fn clear_all() -> Self {
        Self::op(DocOperation::ClearAll)
    }

    pub fn append(index: usize, title: &str, content: &str) -> Self {
        Self::section(DocOperation::Append, index, title, content)
    }

    pub fn replace(index: usize, title: &str, content: &str) -> Self {
        Self::section(DocOperation::Replace, index, title, content)
    }

    pub fn insert(index: usize, title: &str, content: &str) -> Self {
        Self::section(DocOperation::Insert, index, title, content)
    }

    pub fn delete(index: usize) -> Self {
        Self {
            section_index: Some(index),
            ..Self::op(DocOperation::Delete)
        }
    }

    pub fn insert_image(
        index: usize,
        image_url: &str,
        image_description: &str,
        position: ImagePosition,
    ) -> Self {
        Self {
            section_index: Some(index),
            image_url: Some(image_url.to_string()),
            image_description: Some(image_description.to_string()),
            position: Some(position),
            ..Self::op(DocOperation::InsertImage)
        }
    }
}

impl From<DocUpdate> for WireEvent {
    fn from(update: DocUpdate) -> Self {
        WireEvent::DocUpdate(update)
    }
}
