use async_trait::async_trait;
use relay_core::error::ToolError;
use relay_core::tool::*;
use std::collections::HashMap;

use crate::{parse_params, required_str, resolve_path};

const DEFAULT_LIMIT: usize = 2000;

pub struct ViewTool;

#[async_trait]
impl Tool for ViewTool {
    fn definition(&self) -> ToolDefinition {
        let mut params = HashMap::new();
        params.insert(
            "path".into(),
            ParamSchema::string("File path, absolute or relative to the working directory"),
        );
        params.insert(
            "offset".into(),
            ParamSchema::integer("Line number to start reading from (1-based)"),
        );
        params.insert(
            "limit".into(),
            ParamSchema::integer("Maximum number of lines to read (default: 2000)"),
        );

        ToolDefinition {
            name: "view".into(),
            description: "Read a file with line numbers, optionally a window of lines.".into(),
            parameters: params,
            required: vec!["path".into()],
        }
    }

    async fn run(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let params = parse_params(call)?;
        let path = resolve_path(ctx, required_str(&params, "path")?);

        if !path.is_file() {
            return Ok(ToolResult::error(format!("File not found: {}", path.display())));
        }

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("Failed to read {}: {e}", path.display()))
        })?;

        let offset = params["offset"].as_u64().unwrap_or(1).max(1) as usize;
        let limit = params["limit"].as_u64().map_or(DEFAULT_LIMIT, |l| l as usize);

        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        let start = (offset - 1).min(total);
        let end = start.saturating_add(limit).min(total);

        let mut out = String::new();
        for (i, line) in lines[start..end].iter().enumerate() {
            out.push_str(&format!("{:>6}\t{}\n", start + i + 1, line));
        }
        if end < total {
            out.push_str(&format!("\n... ({} more lines, {total} total)", total - end));
        }

        Ok(ToolResult::success(out).with_metadata(serde_json::json!({
            "path": path.display().to_string(),
            "total_lines": total,
        })))
    }
}
