use async_trait::async_trait;
use relay_core::error::ToolError;
use relay_core::tool::*;
use std::collections::HashMap;

use crate::resolve_path;

pub struct LsTool;

#[async_trait]
impl Tool for LsTool {
    fn definition(&self) -> ToolDefinition {
        let mut params = HashMap::new();
        params.insert(
            "path".into(),
            ParamSchema::string("Directory to list (default: working directory)"),
        );

        ToolDefinition {
            name: "ls".into(),
            description: "List a directory. Directories end with '/', files show their size."
                .into(),
            parameters: params,
            required: vec![],
        }
    }

    async fn run(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let params: serde_json::Value =
            serde_json::from_str(&call.input).unwrap_or(serde_json::json!({}));
        let path = resolve_path(ctx, params["path"].as_str().unwrap_or("."));

        if !path.is_dir() {
            return Ok(ToolResult::error(format!(
                "Directory not found: {}",
                path.display()
            )));
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            match entry.metadata().await {
                Ok(meta) if meta.is_dir() => entries.push(format!("  {name}/")),
                Ok(meta) => entries.push(format!("  {name}  ({} bytes)", meta.len())),
                Err(_) => entries.push(format!("  {name}")),
            }
        }
        entries.sort();

        Ok(ToolResult::success(format!(
            "{}:\n{}",
            path.display(),
            entries.join("\n")
        )))
    }
}
