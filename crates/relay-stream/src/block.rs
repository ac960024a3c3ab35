use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Complete,
    Error,
}

/// Client-side state of one tool call. Every transition produces a new
/// record; a finalized record is never touched again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub id: String,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl ToolCallRecord {
    pub fn start(id: &str, tool_name: &str, tool_input: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            tool_name: tool_name.to_string(),
            tool_input,
            status: ToolStatus::Running,
            result: None,
            is_error: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ToolStatus::Running
    }

    pub fn with_partial(&self, content: &str) -> Self {
        let mut result = self.result.clone().unwrap_or_default();
        result.push_str(content);
        Self {
            result: Some(result),
            ..self.clone()
        }
    }

    pub fn finished(&self, content: &str, is_error: bool) -> Self {
        Self {
            status: if is_error {
                ToolStatus::Error
            } else {
                ToolStatus::Complete
            },
            result: Some(content.to_string()),
            is_error: Some(is_error),
            end_time: Some(Utc::now()),
            ..self.clone()
        }
    }

    pub fn to_block(&self) -> ExecutionBlock {
        ExecutionBlock::ToolUse {
            tool_call_id: self.id.clone(),
            tool_name: self.tool_name.clone(),
            tool_input: self.tool_input.clone(),
            status: self.status,
            result: self.result.clone(),
            is_error: self.is_error,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    Write,
    Edit,
}

impl FileOperation {
    /// The file-producing tools; everything else yields no `file_output`.
    pub fn for_tool(tool_name: &str) -> Option<Self> {
        match tool_name.to_ascii_lowercase().as_str() {
            "write" => Some(Self::Write),
            "edit" => Some(Self::Edit),
            _ => None,
        }
    }
}

/// Extracts the target path from a file tool's input.
pub fn file_path_of(tool_input: &serde_json::Value) -> Option<String> {
    ["path", "file_path", "filePath"]
        .iter()
        .find_map(|key| tool_input.get(key).and_then(|v| v.as_str()))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

/// A renderable unit of the reconstructed timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionBlock {
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
        status: ToolStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        start_time: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_time: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    FileOutput {
        file_path: String,
        operation: FileOperation,
        tool_call_id: String,
    },
    #[serde(rename_all = "camelCase")]
    TurnSeparator {
        turn_number: u32,
    },
}
