use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::ToolError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "enum")]
    pub enum_values: Option<Vec<String>>,
}

impl ParamSchema {
    pub fn string(description: &str) -> Self {
        Self {
            param_type: "string".into(),
            description: description.into(),
            enum_values: None,
        }
    }

    pub fn integer(description: &str) -> Self {
        Self {
            param_type: "integer".into(),
            description: description.into(),
            enum_values: None,
        }
    }

    pub fn one_of(description: &str, values: &[&str]) -> Self {
        Self {
            param_type: "string".into(),
            description: description.into(),
            enum_values: Some(values.iter().map(|v| v.to_string()).collect()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: HashMap<String, ParamSchema>,
    pub required: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model.
    pub input: String,
}

impl ToolCall {
    /// Arguments as JSON; unparseable input is kept as a JSON string.
    pub fn args(&self) -> serde_json::Value {
        serde_json::from_str(&self.input)
            .unwrap_or_else(|_| serde_json::Value::String(self.input.clone()))
    }
}

/// One fragment of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultPart {
    Text { text: String },
    Image { data: String, media_type: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ResultPart>,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn success(content: String) -> Self {
        Self {
            content: vec![ResultPart::Text { text: content }],
            is_error: false,
            metadata: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            content: vec![ResultPart::Text { text: message }],
            is_error: true,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Concatenation of the text fragments; images are dropped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ResultPart::Text { text } => Some(text.as_str()),
                ResultPart::Image { .. } => None,
            })
            .collect()
    }
}

pub struct ToolContext {
    pub session_id: String,
    pub working_dir: PathBuf,
    pub cancel_token: tokio_util::sync::CancellationToken,
    pub progress: Option<mpsc::UnboundedSender<String>>,
}

impl ToolContext {
    /// Reports partial output; surfaces as a `tool_execution_update`.
    pub fn report(&self, partial: impl Into<String>) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(partial.into());
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn run(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult, ToolError>;
}
