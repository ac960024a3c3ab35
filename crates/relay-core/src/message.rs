use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ModelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        input: String,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Finish {
        reason: FinishReason,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub parts: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<ModelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    pub created_at: DateTime<Utc>,
}

/// One prior turn as supplied by a client when starting a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    fn with_parts(session_id: String, role: MessageRole, parts: Vec<ContentPart>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            role,
            parts,
            model_id: None,
            token_usage: None,
            created_at: Utc::now(),
        }
    }

    pub fn new_user(session_id: String, text: String) -> Self {
        Self::with_parts(session_id, MessageRole::User, vec![ContentPart::Text { text }])
    }

    pub fn new_assistant(session_id: String, model_id: ModelId) -> Self {
        let mut msg = Self::with_parts(session_id, MessageRole::Assistant, Vec::new());
        msg.model_id = Some(model_id);
        msg
    }

    pub fn new_tool_result(session_id: String, results: Vec<ContentPart>) -> Self {
        Self::with_parts(session_id, MessageRole::Tool, results)
    }

    /// Rebuilds a conversation message from a client-supplied history entry.
    /// Tool entries carry no call id and are replayed as plain user text.
    pub fn from_history(session_id: &str, entry: &HistoryEntry) -> Self {
        let role = match entry.role {
            MessageRole::Assistant => MessageRole::Assistant,
            MessageRole::User | MessageRole::Tool => MessageRole::User,
        };
        Self::with_parts(
            session_id.to_string(),
            role,
            vec![ContentPart::Text {
                text: entry.content.clone(),
            }],
        )
    }

    pub fn tool_calls(&self) -> Vec<(&str, &str, &str)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.parts.iter().find_map(|p| match p {
            ContentPart::Finish { reason, .. } => Some(*reason),
            _ => None,
        })
    }

    pub fn append_text(&mut self, delta: &str) {
        if let Some(ContentPart::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
        } else {
            self.parts.push(ContentPart::Text {
                text: delta.to_string(),
            });
        }
    }

    pub fn append_reasoning(&mut self, delta: &str) {
        if let Some(ContentPart::Reasoning { text }) = self.parts.last_mut() {
            text.push_str(delta);
        } else {
            self.parts.push(ContentPart::Reasoning {
                text: delta.to_string(),
            });
        }
    }

    pub fn add_tool_call(&mut self, id: String, name: String, input: String) {
        self.parts.push(ContentPart::ToolCall { id, name, input });
    }

    pub fn add_finish(&mut self, reason: FinishReason) {
        self.parts.push(ContentPart::Finish {
            reason,
            timestamp: Utc::now(),
        });
    }
}
