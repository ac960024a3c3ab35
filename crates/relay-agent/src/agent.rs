use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use relay_core::error::{ProviderError, RelayError, ToolError};
use relay_core::event::{EventSink, EventSource, InternalEvent, MessageDelta};
use relay_core::message::*;
use relay_core::model::ModelId;
use relay_core::provider::*;
use relay_core::tool::*;

const MAX_TOOL_RESULT_CHARS: usize = 30_000;
const RATE_LIMIT_ATTEMPTS: u32 = 3;

/// Model, tools and instructions for one kind of session.
#[derive(Clone)]
pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: Vec<Arc<dyn Tool>>,
    system_prompt: String,
    working_dir: PathBuf,
    max_turns: u32,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Vec<Arc<dyn Tool>>,
        system_prompt: String,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            provider,
            tools,
            system_prompt,
            working_dir,
            max_turns: 50,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn model_id(&self) -> &ModelId {
        &self.provider.model().id
    }

    pub fn model_name(&self) -> &str {
        &self.provider.model().display_name
    }

    /// Starts a session seeded with prior turns.
    pub fn session(&self, session_id: impl Into<String>, history: Vec<Message>) -> AgentSession {
        AgentSession {
            agent: self.clone(),
            session_id: session_id.into(),
            messages: tokio::sync::Mutex::new(history),
            sinks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }
}

/// A running conversation. Emits the internal event taxonomy to every
/// subscribed sink, awaiting each one, so sinks see events strictly in
/// order and a slow sink holds the loop back.
pub struct AgentSession {
    agent: Agent,
    session_id: String,
    messages: tokio::sync::Mutex<Vec<Message>>,
    sinks: Mutex<Vec<Arc<dyn EventSink>>>,
    cancel: CancellationToken,
}

#[async_trait]
impl EventSource for AgentSession {
    fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.lock_sinks().push(sink);
    }

    async fn prompt(&self, text: String) -> Result<(), RelayError> {
        let mut messages = self.messages.lock().await;
        let user = Message::new_user(self.session_id.clone(), text);
        let mut produced = vec![user.clone()];
        messages.push(user);

        tracing::info!(session_id = %self.session_id, model = %self.agent.model_id(), "turn sequence started");
        self.emit(InternalEvent::AgentStart).await;

        let result = self.run_turns(&mut messages, &mut produced).await;
        match &result {
            Ok(()) => {
                self.emit(InternalEvent::AgentEnd { messages: produced }).await;
                tracing::info!(session_id = %self.session_id, "turn sequence complete");
            }
            Err(RelayError::Cancelled) => {
                tracing::info!(session_id = %self.session_id, "turn sequence aborted");
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, "turn sequence failed: {e}");
                self.emit(InternalEvent::MessageUpdate {
                    event: MessageDelta::Error {
                        error_message: e.to_string(),
                    },
                })
                .await;
            }
        }
        result
    }

    fn abort(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(session_id = %self.session_id, "abort requested");
        }
        self.cancel.cancel();
    }
}

impl AgentSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.messages.lock().await.clone()
    }

    fn lock_sinks(&self) -> MutexGuard<'_, Vec<Arc<dyn EventSink>>> {
        self.sinks.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn emit(&self, event: InternalEvent) {
        let sinks = self.lock_sinks().clone();
        tracing::trace!(kind = event.kind(), "emit");
        for sink in sinks {
            sink.emit(event.clone()).await;
        }
    }

    fn check_cancelled(&self) -> Result<(), RelayError> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        Ok(())
    }

    /// Trimming may drop older history from `messages`; everything this
    /// sequence adds is also kept in `produced`.
    async fn run_turns(
        &self,
        messages: &mut Vec<Message>,
        produced: &mut Vec<Message>,
    ) -> Result<(), RelayError> {
        let tool_defs: Vec<ToolDefinition> =
            self.agent.tools.iter().map(|t| t.definition()).collect();
        let context_window = self.agent.provider.model().context_window;

        for turn in 1..=self.agent.max_turns {
            self.check_cancelled()?;
            tracing::debug!(session_id = %self.session_id, turn, "turn start");
            self.emit(InternalEvent::TurnStart).await;

            trim_messages_to_fit(messages, context_window, &self.agent.system_prompt);
            let mut stream = self.open_stream(messages, &tool_defs).await?;

            self.emit(InternalEvent::MessageStart).await;
            let assistant = self.process_stream(&mut stream).await?;
            self.emit(InternalEvent::MessageEnd).await;

            let finish = assistant.finish_reason().unwrap_or(FinishReason::EndTurn);
            let calls: Vec<ToolCall> = assistant
                .tool_calls()
                .into_iter()
                .map(|(id, name, input)| ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: input.to_string(),
                })
                .collect();
            produced.push(assistant.clone());
            messages.push(assistant);

            if finish != FinishReason::ToolUse || calls.is_empty() {
                self.emit(InternalEvent::TurnEnd).await;
                return Ok(());
            }

            let mut results = Vec::new();
            for call in &calls {
                self.check_cancelled()?;
                results.push(self.execute_tool(call).await?);
            }
            let tool_results = Message::new_tool_result(self.session_id.clone(), results);
            produced.push(tool_results.clone());
            messages.push(tool_results);
            self.emit(InternalEvent::TurnEnd).await;
        }

        Err(RelayError::Source(format!(
            "maximum of {} turns reached",
            self.agent.max_turns
        )))
    }

    async fn open_stream(
        &self,
        messages: &[Message],
        tool_defs: &[ToolDefinition],
    ) -> Result<ProviderEventStream, RelayError> {
        let provider = &self.agent.provider;
        for attempt in 1..=RATE_LIMIT_ATTEMPTS {
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => return Err(RelayError::Cancelled),
                r = provider.stream_response(messages, &self.agent.system_prompt, tool_defs) => r,
            };
            match opened {
                Ok(stream) => return Ok(stream),
                Err(ProviderError::RateLimited { retry_after_ms }) if attempt < RATE_LIMIT_ATTEMPTS => {
                    let wait = retry_after_ms.max(5_000) * attempt as u64;
                    tracing::warn!(attempt, wait_ms = wait, "rate limited, waiting");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(RelayError::Cancelled),
                        _ = tokio::time::sleep(std::time::Duration::from_millis(wait)) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ProviderError::RateLimited { retry_after_ms: 0 }.into())
    }

    /// Folds one model response into an assistant message, emitting
    /// deltas as they arrive.
    async fn process_stream(&self, stream: &mut ProviderEventStream) -> Result<Message, RelayError> {
        let mut msg = Message::new_assistant(
            self.session_id.clone(),
            self.agent.provider.model().id.clone(),
        );
        let mut pending_calls: Vec<(String, String, String)> = Vec::new();
        let mut finish_reason = None;
        let mut usage = TokenUsage::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(RelayError::Cancelled),
                event = stream.next() => event,
            };
            let Some(event) = event else { break };

            match event {
                ProviderEvent::ContentDelta { text } => {
                    msg.append_text(&text);
                    self.emit(InternalEvent::text(text)).await;
                }
                ProviderEvent::ThinkingDelta { text } => {
                    msg.append_reasoning(&text);
                    self.emit(InternalEvent::thinking(text)).await;
                }
                ProviderEvent::ToolUseStart { id, name } => {
                    pending_calls.push((id, name, String::new()));
                }
                ProviderEvent::ToolUseDelta {
                    id,
                    input_json_chunk,
                } => {
                    if let Some(call) = pending_calls.iter_mut().find(|c| c.0 == id) {
                        call.2.push_str(&input_json_chunk);
                    }
                }
                ProviderEvent::ToolUseStop { id } => {
                    let Some(pos) = pending_calls.iter().position(|c| c.0 == id) else {
                        continue;
                    };
                    let (id, name, input) = pending_calls.remove(pos);
                    let input = if input.trim().is_empty() { "{}".to_string() } else { input };
                    msg.add_tool_call(id.clone(), name.clone(), input.clone());
                    self.emit(InternalEvent::MessageUpdate {
                        event: MessageDelta::ToolcallEnd {
                            tool_call: ToolCall { id, name, input },
                        },
                    })
                    .await;
                }
                ProviderEvent::Complete {
                    finish_reason: fr,
                    usage: u,
                } => {
                    finish_reason = Some(fr);
                    usage = u;
                }
                ProviderEvent::Error { error } => return Err(error.into()),
            }
        }

        for (id, name, input) in pending_calls {
            tracing::debug!(tool_call_id = %id, "tool call closed by end of stream");
            msg.add_tool_call(id, name, input);
        }

        let finish_reason = match finish_reason {
            Some(fr) => fr,
            None if !msg.tool_calls().is_empty() => FinishReason::ToolUse,
            None => FinishReason::EndTurn,
        };
        msg.add_finish(finish_reason);
        msg.token_usage = Some(usage);
        Ok(msg)
    }

    async fn execute_tool(&self, call: &ToolCall) -> Result<ContentPart, RelayError> {
        self.emit(InternalEvent::ToolExecutionStart {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            args: call.args(),
        })
        .await;

        let result = match self.agent.tools.iter().find(|t| t.definition().name == call.name) {
            Some(tool) => self.run_tool(tool.as_ref(), call).await?,
            None => ToolResult::error(ToolError::NotFound(call.name.clone()).to_string()),
        };

        tracing::debug!(tool = %call.name, is_error = result.is_error, "tool finished");
        let text = result.text();
        let is_error = result.is_error;
        self.emit(InternalEvent::ToolExecutionEnd {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result,
            is_error,
        })
        .await;

        Ok(ContentPart::ToolResult {
            tool_call_id: call.id.clone(),
            content: format!(
                "<tool_output tool=\"{}\">\n{}\n</tool_output>",
                call.name,
                truncate_tool_result(&text, MAX_TOOL_RESULT_CHARS)
            ),
            is_error,
        })
    }

    /// Runs one tool, relaying its progress reports as updates. Argument
    /// and execution errors become error results; a lost document
    /// transport ends the sequence.
    async fn run_tool(&self, tool: &dyn Tool, call: &ToolCall) -> Result<ToolResult, RelayError> {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let ctx = ToolContext {
            session_id: self.session_id.clone(),
            working_dir: self.agent.working_dir.clone(),
            cancel_token: self.cancel.child_token(),
            progress: Some(progress_tx),
        };

        let run = tool.run(call, &ctx);
        tokio::pin!(run);
        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(RelayError::Cancelled),
                Some(partial) = progress_rx.recv() => self.emit_progress(call, partial).await,
                outcome = &mut run => break outcome,
            }
        };
        while let Ok(partial) = progress_rx.try_recv() {
            self.emit_progress(call, partial).await;
        }

        match outcome {
            Ok(result) => Ok(result),
            Err(ToolError::Document(e)) if !e.is_recoverable() => {
                Err(RelayError::Tool(ToolError::Document(e)))
            }
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }

    async fn emit_progress(&self, call: &ToolCall, partial: String) {
        self.emit(InternalEvent::ToolExecutionUpdate {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            partial_result: ToolResult::success(partial),
        })
        .await;
    }
}

fn truncate_tool_result(content: &str, max_chars: usize) -> String {
    if content.len() <= max_chars {
        return content.to_string();
    }
    let mut boundary = max_chars;
    while !content.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!(
        "{}\n\n... [truncated: {} total chars, showing first {}]",
        &content[..boundary],
        content.len(),
        boundary,
    )
}

/// Rough estimate, ~4 chars per token.
fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64) / 4
}

fn estimate_message_tokens(msg: &Message) -> u64 {
    let total: u64 = msg
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } | ContentPart::Reasoning { text } => estimate_tokens(text),
            ContentPart::ToolCall { input, .. } => estimate_tokens(input) + 20,
            ContentPart::ToolResult { content, .. } => estimate_tokens(content) + 10,
            ContentPart::Finish { .. } => 0,
        })
        .sum();
    total.max(1)
}

/// Drops the oldest middle turns until the history fits in 75% of the
/// context window. The first message and the last four are kept.
pub(crate) fn trim_messages_to_fit(
    messages: &mut Vec<Message>,
    context_window: u64,
    system_prompt: &str,
) {
    let system_tokens = estimate_tokens(system_prompt) + 200;
    let budget = context_window.saturating_sub(system_tokens) * 3 / 4;

    let total: u64 = messages.iter().map(estimate_message_tokens).sum();
    if total <= budget {
        return;
    }

    let keep_tail = 4.min(messages.len());
    let keep_head = 1.min(messages.len());
    if messages.len() <= keep_head + keep_tail {
        return;
    }
    let tail_start = messages.len() - keep_tail;

    let mut used: u64 = messages[..keep_head]
        .iter()
        .chain(messages[tail_start..].iter())
        .map(estimate_message_tokens)
        .sum();
    let mut keep_until = keep_head;
    for msg in &messages[keep_head..tail_start] {
        let cost = estimate_message_tokens(msg);
        if used + cost > budget {
            break;
        }
        used += cost;
        keep_until += 1;
    }

    if keep_until < tail_start {
        tracing::debug!(dropped = tail_start - keep_until, "trimming history to fit context");
        messages.drain(keep_until..tail_start);
    }
}
