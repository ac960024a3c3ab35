use async_trait::async_trait;
use relay_core::error::ToolError;
use relay_core::tool::*;
use std::collections::HashMap;

use crate::{parse_params, required_str, resolve_path};

pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn definition(&self) -> ToolDefinition {
        let mut params = HashMap::new();
        params.insert("path".into(), ParamSchema::string("File path to edit"));
        params.insert(
            "old_string".into(),
            ParamSchema::string("Exact text to replace"),
        );
        params.insert("new_string".into(), ParamSchema::string("Replacement text"));
        params.insert(
            "replace_all".into(),
            ParamSchema {
                param_type: "boolean".into(),
                description: "Replace every occurrence instead of requiring a unique match"
                    .into(),
                enum_values: None,
            },
        );

        ToolDefinition {
            name: "edit".into(),
            description: "Replace an exact string in a file. Unless replace_all is set, \
                old_string must match exactly one location."
                .into(),
            parameters: params,
            required: vec!["path".into(), "old_string".into(), "new_string".into()],
        }
    }

    async fn run(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let params = parse_params(call)?;
        let path = resolve_path(ctx, required_str(&params, "path")?);
        let old_string = required_str(&params, "old_string")?;
        let new_string = required_str(&params, "new_string")?;
        let replace_all = params["replace_all"].as_bool().unwrap_or(false);

        if old_string.is_empty() {
            return Ok(ToolResult::error("old_string must not be empty".into()));
        }
        if !path.is_file() {
            return Ok(ToolResult::error(format!("File not found: {}", path.display())));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let count = content.matches(old_string).count();
        match count {
            0 => {
                return Ok(ToolResult::error(
                    "old_string not found in file. Make sure it matches exactly.".into(),
                ))
            }
            n if n > 1 && !replace_all => {
                return Ok(ToolResult::error(format!(
                    "old_string found {n} times. Add more context or set replace_all."
                )))
            }
            _ => {}
        }

        let updated = if replace_all {
            content.replace(old_string, new_string)
        } else {
            content.replacen(old_string, new_string, 1)
        };
        tokio::fs::write(&path, &updated)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolResult::success(format!(
            "Edited {}: {count} replacement(s)",
            path.display()
        )))
    }
}
