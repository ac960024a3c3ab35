use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::block::{file_path_of, ExecutionBlock, FileOperation, ToolCallRecord};
use crate::wire::{DocUpdate, WireEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReducerStatus {
    Idle,
    Streaming,
    Completed,
    Aborted,
    Errored,
}

impl ReducerStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Errored)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum OpenBlock {
    Content(String),
    Thinking(String),
}

impl OpenBlock {
    fn to_block(&self) -> ExecutionBlock {
        match self {
            Self::Content(text) => ExecutionBlock::Content { text: text.clone() },
            Self::Thinking(text) => ExecutionBlock::Thinking { text: text.clone() },
        }
    }
}

/// Called with the current timeline after every fold step that changed it.
pub type Observer = Box<dyn FnMut(&[ExecutionBlock]) + Send>;

/// Everything one turn sequence produced, handed over once it is finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReducerOutput {
    pub session_id: Option<String>,
    pub status: ReducerStatus,
    pub blocks: Vec<ExecutionBlock>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub content: String,
    pub error: Option<String>,
    pub doc_updates: Vec<DocUpdate>,
}

/// Folds a wire stream into execution blocks and tool call records.
///
/// One reducer per turn sequence. Blocks are append-only; the only in-place
/// change is replacing a `tool_use` block while its call is running. Text
/// is buffered in an open block that is pushed when something else arrives.
pub struct StreamReducer {
    blocks: Vec<ExecutionBlock>,
    open: Option<OpenBlock>,
    tool_calls: HashMap<String, ToolCallRecord>,
    tool_order: Vec<String>,
    tool_positions: HashMap<String, usize>,
    content: String,
    turn_count: u32,
    status: ReducerStatus,
    error: Option<String>,
    session_id: Option<String>,
    doc_updates: Vec<DocUpdate>,
    observer: Option<Observer>,
}

impl Default for StreamReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReducer {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            open: None,
            tool_calls: HashMap::new(),
            tool_order: Vec::new(),
            tool_positions: HashMap::new(),
            content: String::new(),
            turn_count: 0,
            status: ReducerStatus::Idle,
            error: None,
            session_id: None,
            doc_updates: Vec::new(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl FnMut(&[ExecutionBlock]) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn status(&self) -> ReducerStatus {
        self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Blocks pushed so far, without the open text block.
    pub fn blocks(&self) -> &[ExecutionBlock] {
        &self.blocks
    }

    /// Pushed blocks plus the open text block, for live rendering.
    pub fn snapshot(&self) -> Vec<ExecutionBlock> {
        let mut blocks = self.blocks.clone();
        if let Some(open) = &self.open {
            blocks.push(open.to_block());
        }
        blocks
    }

    pub fn tool_call(&self, id: &str) -> Option<&ToolCallRecord> {
        self.tool_calls.get(id)
    }

    pub fn tool_calls(&self) -> Vec<&ToolCallRecord> {
        self.tool_order
            .iter()
            .filter_map(|id| self.tool_calls.get(id))
            .collect()
    }

    /// All `content` text received, across blocks.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn doc_updates(&self) -> &[DocUpdate] {
        &self.doc_updates
    }

    /// Folds one event. Returns whether the state changed.
    pub fn apply(&mut self, event: WireEvent) -> bool {
        if self.is_finished() {
            tracing::debug!(kind = event.kind(), "event after stream finished, ignored");
            return false;
        }
        if self.status == ReducerStatus::Idle {
            self.status = ReducerStatus::Streaming;
        }

        let changed = match event {
            WireEvent::AgentStart { session_id } => {
                if session_id.is_some() {
                    self.session_id = session_id;
                }
                true
            }
            WireEvent::Content { text } => {
                self.push_content(&text);
                true
            }
            WireEvent::Thinking { text } => {
                self.push_thinking(&text);
                true
            }
            WireEvent::ToolUse {
                tool_call_id,
                tool_name,
                tool_input,
            } => self.start_tool(&tool_call_id, &tool_name, tool_input),
            WireEvent::ToolUpdate {
                tool_call_id,
                content,
                ..
            } => self.update_tool(&tool_call_id, &content),
            WireEvent::ToolResult {
                tool_call_id,
                content,
                is_error,
                ..
            } => self.finish_tool(&tool_call_id, &content, is_error),
            WireEvent::TurnEnd => {
                self.close_open();
                self.turn_count += 1;
                self.blocks.push(ExecutionBlock::TurnSeparator {
                    turn_number: self.turn_count,
                });
                true
            }
            WireEvent::Complete { .. } => {
                self.close_open();
                self.status = ReducerStatus::Completed;
                true
            }
            WireEvent::Error { message } => {
                self.close_open();
                self.status = ReducerStatus::Errored;
                self.error = Some(message);
                true
            }
            WireEvent::DocUpdate(update) => {
                self.doc_updates.push(update);
                false
            }
        };

        if changed {
            self.notify();
        }
        changed
    }

    /// Finalizes with whatever has accumulated; running tool calls stay
    /// running.
    pub fn abort(&mut self) {
        if self.is_finished() {
            return;
        }
        self.close_open();
        self.status = ReducerStatus::Aborted;
        self.notify();
    }

    /// Finalizes as errored, keeping partial blocks.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.is_finished() {
            return;
        }
        self.close_open();
        self.status = ReducerStatus::Errored;
        self.error = Some(message.into());
        self.notify();
    }

    pub fn finish(mut self) -> ReducerOutput {
        self.close_open();
        let tool_calls = self
            .tool_order
            .iter()
            .filter_map(|id| self.tool_calls.remove(id))
            .collect();
        ReducerOutput {
            session_id: self.session_id,
            status: self.status,
            blocks: self.blocks,
            tool_calls,
            content: self.content,
            error: self.error,
            doc_updates: self.doc_updates,
        }
    }

    fn push_content(&mut self, text: &str) {
        self.content.push_str(text);
        match &mut self.open {
            Some(OpenBlock::Content(buf)) => buf.push_str(text),
            _ => {
                self.close_open();
                self.open = Some(OpenBlock::Content(text.to_string()));
            }
        }
    }

    fn push_thinking(&mut self, text: &str) {
        match &mut self.open {
            Some(OpenBlock::Thinking(buf)) => buf.push_str(text),
            _ => {
                self.close_open();
                self.open = Some(OpenBlock::Thinking(text.to_string()));
            }
        }
    }

    fn close_open(&mut self) {
        if let Some(open) = self.open.take() {
            self.blocks.push(open.to_block());
        }
    }

    fn start_tool(&mut self, id: &str, name: &str, input: serde_json::Value) -> bool {
        self.close_open();
        if self.tool_calls.contains_key(id) {
            tracing::debug!(tool_call_id = id, "duplicate tool_use ignored");
            return false;
        }

        let record = ToolCallRecord::start(id, name, input);
        self.tool_positions.insert(id.to_string(), self.blocks.len());
        self.blocks.push(record.to_block());
        self.tool_order.push(id.to_string());
        self.tool_calls.insert(id.to_string(), record);
        true
    }

    fn update_tool(&mut self, id: &str, content: &str) -> bool {
        let Some(record) = self.tool_calls.get(id).filter(|r| r.is_running()) else {
            tracing::warn!(tool_call_id = id, "tool_update for unknown or finished call ignored");
            return false;
        };
        let updated = record.with_partial(content);
        self.replace_tool(updated);
        true
    }

    fn finish_tool(&mut self, id: &str, content: &str, is_error: bool) -> bool {
        let Some(record) = self.tool_calls.get(id).filter(|r| r.is_running()) else {
            tracing::warn!(tool_call_id = id, "tool_result for unknown or finished call ignored");
            return false;
        };
        let finished = record.finished(content, is_error);

        let file_output = if is_error {
            None
        } else {
            FileOperation::for_tool(&finished.tool_name).and_then(|operation| {
                file_path_of(&finished.tool_input).map(|file_path| ExecutionBlock::FileOutput {
                    file_path,
                    operation,
                    tool_call_id: id.to_string(),
                })
            })
        };

        self.replace_tool(finished);
        if let Some(block) = file_output {
            self.close_open();
            self.blocks.push(block);
        }
        true
    }

    fn replace_tool(&mut self, record: ToolCallRecord) {
        if let Some(&pos) = self.tool_positions.get(&record.id) {
            self.blocks[pos] = record.to_block();
        }
        self.tool_calls.insert(record.id.clone(), record);
    }

    fn notify(&mut self) {
        if self.observer.is_some() {
            let snapshot = self.snapshot();
            if let Some(observer) = self.observer.as_mut() {
                observer(&snapshot);
            }
        }
    }
}
