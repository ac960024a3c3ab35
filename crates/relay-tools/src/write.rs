use async_trait::async_trait;
use relay_core::error::ToolError;
use relay_core::tool::*;
use std::collections::HashMap;

use crate::{parse_params, required_str, resolve_path};

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn definition(&self) -> ToolDefinition {
        let mut params = HashMap::new();
        params.insert("path".into(), ParamSchema::string("File path to write to"));
        params.insert(
            "content".into(),
            ParamSchema::string("Full content of the file"),
        );

        ToolDefinition {
            name: "write".into(),
            description: "Create or overwrite a file. Parent directories are created as needed."
                .into(),
            parameters: params,
            required: vec!["path".into(), "content".into()],
        }
    }

    async fn run(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let params = parse_params(call)?;
        let path = resolve_path(ctx, required_str(&params, "path")?);
        let content = required_str(&params, "content")?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                ctx.report(format!("Creating {}\n", parent.display()));
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
            }
        }

        let existed = path.exists();
        ctx.report(format!("Writing {} bytes\n", content.len()));
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        tracing::debug!(path = %path.display(), bytes = content.len(), "file written");
        let verb = if existed { "Overwrote" } else { "Created" };
        Ok(ToolResult::success(format!(
            "{verb} {} ({} lines)",
            path.display(),
            content.lines().count()
        )))
    }
}
