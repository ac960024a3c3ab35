mod edit;
mod ls;
mod view;
mod write;

pub use edit::EditTool;
pub use ls::LsTool;
pub use view::ViewTool;
pub use write::WriteTool;

use relay_core::error::ToolError;
use relay_core::tool::{Tool, ToolCall, ToolContext};
use std::path::PathBuf;
use std::sync::Arc;


/// File-system tools for coding sessions, rooted at the context's
/// working directory.
pub fn create_coding_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ViewTool),
        Arc::new(WriteTool),
        Arc::new(EditTool),
        Arc::new(LsTool),
    ]
}

pub(crate) fn parse_params(call: &ToolCall) -> Result<serde_json::Value, ToolError> {
    serde_json::from_str(&call.input).map_err(|e| ToolError::InvalidParams(e.to_string()))
}

pub(crate) fn required_str<'a>(
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    params[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidParams(format!("missing '{key}'")))
}

/// Relative paths resolve against the working directory.
pub(crate) fn resolve_path(ctx: &ToolContext, path: &str) -> PathBuf {
    let p = std::path::Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        ctx.working_dir.join(p)
    }
}
