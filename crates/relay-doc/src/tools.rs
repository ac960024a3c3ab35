use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::error::{DocumentError, ToolError};
use relay_core::tool::*;
use relay_stream::wire::ImagePosition;

use crate::document::DocumentSnapshot;
use crate::model::DocumentModel;

pub fn create_document_tools(model: DocumentModel) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(GetDocumentTool(model.clone())),
        Arc::new(ClearDocumentTool(model.clone())),
        Arc::new(AppendSectionTool(model.clone())),
        Arc::new(ReplaceSectionTool(model.clone())),
        Arc::new(DeleteSectionTool(model.clone())),
        Arc::new(InsertSectionTool(model.clone())),
        Arc::new(InsertImageTool(model)),
    ]
}

/// Bad arguments go back to the model as an error result it can retry.
struct Args(serde_json::Value);

impl Args {
    fn parse(call: &ToolCall) -> Result<Self, ToolResult> {
        serde_json::from_str(&call.input)
            .map(Self)
            .map_err(|e| ToolResult::error(format!("Invalid parameters: {e}")))
    }

    fn str(&self, key: &str) -> Result<&str, ToolResult> {
        self.0[key]
            .as_str()
            .ok_or_else(|| ToolResult::error(format!("Invalid parameters: missing '{key}'")))
    }

    fn index(&self) -> Result<usize, ToolResult> {
        self.0["section_index"]
            .as_u64()
            .map(|i| i as usize)
            .ok_or_else(|| {
                ToolResult::error(
                    "Invalid parameters: 'section_index' must be a non-negative integer".into(),
                )
            })
    }
}

macro_rules! arg {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(result) => return Ok(result),
        }
    };
}

/// Recoverable document errors become error results; a lost transport
/// fails the call.
fn outcome<T>(
    result: Result<T, DocumentError>,
    message: impl FnOnce(T) -> String,
) -> Result<ToolResult, ToolError> {
    match result {
        Ok(value) => Ok(ToolResult::success(message(value))),
        Err(e) if e.is_recoverable() => {
            tracing::debug!("document tool rejected: {e}");
            Ok(ToolResult::error(e.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn render(snapshot: &DocumentSnapshot) -> String {
    if snapshot.sections.is_empty() {
        return "The document is empty.".into();
    }
    let mut out = format!("Document has {} sections:\n", snapshot.sections.len());
    for s in &snapshot.sections {
        out.push_str(&format!("\n[{}] {}\n{}\n", s.index, s.title, s.content));
    }
    out
}

fn section_params(with_index: bool) -> (HashMap<String, ParamSchema>, Vec<String>) {
    let mut params = HashMap::new();
    let mut required = Vec::new();
    if with_index {
        params.insert(
            "section_index".into(),
            ParamSchema::integer("Zero-based section index"),
        );
        required.push("section_index".into());
    }
    params.insert("title".into(), ParamSchema::string("Section title"));
    params.insert(
        "content".into(),
        ParamSchema::string("Section body as HTML, without the heading"),
    );
    required.push("title".into());
    required.push("content".into());
    (params, required)
}

pub struct GetDocumentTool(DocumentModel);

#[async_trait]
impl Tool for GetDocumentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_document".into(),
            description: "Read the current document: every section with its index, title and \
                content. Call again after inserting or deleting, indices shift."
                .into(),
            parameters: HashMap::new(),
            required: vec![],
        }
    }

    async fn run(&self, _call: &ToolCall, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let snapshot = self.0.get_document();
        let metadata = serde_json::to_value(&snapshot).unwrap_or_default();
        Ok(ToolResult::success(render(&snapshot)).with_metadata(metadata))
    }
}

pub struct ClearDocumentTool(DocumentModel);

#[async_trait]
impl Tool for ClearDocumentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "clear_document".into(),
            description: "Remove every section. Use before rewriting a document from scratch."
                .into(),
            parameters: HashMap::new(),
            required: vec![],
        }
    }

    async fn run(&self, _call: &ToolCall, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        outcome(self.0.clear_document().await, |_| "Document cleared.".into())
    }
}

pub struct AppendSectionTool(DocumentModel);

#[async_trait]
impl Tool for AppendSectionTool {
    fn definition(&self) -> ToolDefinition {
        let (parameters, required) = section_params(false);
        ToolDefinition {
            name: "append_section".into(),
            description: "Add a section at the end of the document. The first section is the \
                document title and introduction."
                .into(),
            parameters,
            required,
        }
    }

    async fn run(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let args = arg!(Args::parse(call));
        let title = arg!(args.str("title"));
        let content = arg!(args.str("content"));
        outcome(self.0.append_section(title, content).await, |s| {
            format!("Appended section [{}] {}", s.index, s.title)
        })
    }
}

pub struct ReplaceSectionTool(DocumentModel);

#[async_trait]
impl Tool for ReplaceSectionTool {
    fn definition(&self) -> ToolDefinition {
        let (parameters, required) = section_params(true);
        ToolDefinition {
            name: "replace_section".into(),
            description: "Replace the title and content of an existing section. The title is \
                always overwritten; pass the current title to keep it."
                .into(),
            parameters,
            required,
        }
    }

    async fn run(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let args = arg!(Args::parse(call));
        let index = arg!(args.index());
        let title = arg!(args.str("title"));
        let content = arg!(args.str("content"));
        outcome(self.0.replace_section(index, title, content).await, |_| {
            format!("Replaced section [{index}] {title}")
        })
    }
}

pub struct DeleteSectionTool(DocumentModel);

#[async_trait]
impl Tool for DeleteSectionTool {
    fn definition(&self) -> ToolDefinition {
        let mut parameters = HashMap::new();
        parameters.insert(
            "section_index".into(),
            ParamSchema::integer("Index of the section to delete; 0 is protected"),
        );
        ToolDefinition {
            name: "delete_section".into(),
            description: "Delete a section. Later sections move up by one index. The title \
                section (index 0) cannot be deleted."
                .into(),
            parameters,
            required: vec!["section_index".into()],
        }
    }

    async fn run(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let args = arg!(Args::parse(call));
        let index = arg!(args.index());
        outcome(self.0.delete_section(index).await, |remaining| {
            format!("Deleted section [{index}]; {remaining} sections remain")
        })
    }
}

pub struct InsertSectionTool(DocumentModel);

#[async_trait]
impl Tool for InsertSectionTool {
    fn definition(&self) -> ToolDefinition {
        let (parameters, required) = section_params(true);
        ToolDefinition {
            name: "insert_section".into(),
            description: "Insert a section at the given index, shifting later sections down. \
                An index equal to the section count appends."
                .into(),
            parameters,
            required,
        }
    }

    async fn run(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let args = arg!(Args::parse(call));
        let index = arg!(args.index());
        let title = arg!(args.str("title"));
        let content = arg!(args.str("content"));
        outcome(self.0.insert_section(index, title, content).await, |len| {
            format!("Inserted section [{index}] {title}; document has {len} sections")
        })
    }
}

pub struct InsertImageTool(DocumentModel);

#[async_trait]
impl Tool for InsertImageTool {
    fn definition(&self) -> ToolDefinition {
        let mut parameters = HashMap::new();
        parameters.insert(
            "section_index".into(),
            ParamSchema::integer("Section the image is placed next to"),
        );
        parameters.insert("image_url".into(), ParamSchema::string("Image URL"));
        parameters.insert(
            "image_description".into(),
            ParamSchema::string("Short description used as alt text"),
        );
        parameters.insert(
            "position".into(),
            ParamSchema::one_of(
                "Place the image before or after the section (default after_section)",
                &["before_section", "after_section"],
            ),
        );
        ToolDefinition {
            name: "insert_image".into(),
            description: "Place an image before or after a section. Section content is not \
                changed."
                .into(),
            parameters,
            required: vec!["section_index".into(), "image_url".into()],
        }
    }

    async fn run(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let args = arg!(Args::parse(call));
        let index = arg!(args.index());
        let url = arg!(args.str("image_url"));
        let description = args.0["image_description"].as_str().unwrap_or_default();
        let position = match args.0["position"].as_str() {
            None => ImagePosition::default(),
            Some(p) => match serde_json::from_value(serde_json::Value::String(p.to_string())) {
                Ok(position) => position,
                Err(_) => {
                    return Ok(ToolResult::error(format!(
                        "Invalid parameters: unknown position '{p}'"
                    )))
                }
            },
        };
        outcome(
            self.0
                .insert_image(index, url, description, position)
                .await,
            |_| format!("Inserted image next to section [{index}]"),
        )
    }
}
