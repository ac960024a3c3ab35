use async_trait::async_trait;
use relay_core::error::ProviderError;
use relay_core::message::*;
use relay_core::model::Model;
use relay_core::provider::*;
use relay_core::tool::ToolDefinition;
use reqwest::Client;
use std::collections::HashMap;

const MAX_RETRIES: u32 = 6;
const INITIAL_BACKOFF_MS: u64 = 2000;
const MAX_BACKOFF_MS: u64 = 60_000;

/// Streaming client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: Model,
    base_url: String,
    max_tokens: u64,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: Model, base_url: String, max_tokens: u64) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens,
        }
    }

    fn request_body(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model.id.0,
            "max_tokens": self.max_tokens,
            "messages": convert_messages(messages, system_prompt),
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(convert_tools(tools));
        }
        body
    }

    async fn send_with_retry(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut last_err = ProviderError::Http("no attempts made".into());

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let backoff = match &last_err {
                    ProviderError::RateLimited { retry_after_ms } => *retry_after_ms,
                    _ => compute_backoff(attempt),
                };
                tracing::warn!(
                    attempt,
                    max = MAX_RETRIES - 1,
                    backoff_ms = backoff,
                    "retrying model request: {last_err}"
                );
                tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
            }

            let resp = match self
                .client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_err = ProviderError::Http(e.to_string());
                    continue;
                }
            };

            let status = resp.status().as_u16();
            if resp.status().is_success() {
                return Ok(resp);
            }

            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);

            let text = resp.text().await.unwrap_or_default();
            if matches!(status, 429 | 502 | 503) {
                last_err = ProviderError::RateLimited {
                    retry_after_ms: retry_after.unwrap_or_else(|| compute_backoff(attempt + 1)),
                };
                continue;
            }
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        Err(last_err)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn stream_response(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<ProviderEventStream, ProviderError> {
        let body = self.request_body(messages, system_prompt, tools);
        let resp = self.send_with_retry(&body).await?;
        tracing::debug!(model = %self.model.id, "model stream opened");

        let byte_stream = resp.bytes_stream();
        let stream = async_stream::stream! {
            use tokio_stream::StreamExt;

            let mut byte_stream = Box::pin(byte_stream);
            let mut parser = ChunkParser::default();

            while let Some(chunk) = byte_stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        for event in parser.push(&bytes) {
                            yield event;
                        }
                    }
                    Err(e) => {
                        yield ProviderEvent::Error {
                            error: ProviderError::Stream(e.to_string()),
                        };
                        return;
                    }
                }
            }
            for event in parser.finish() {
                yield event;
            }
        };

        Ok(Box::pin(stream))
    }

    fn model(&self) -> &Model {
        &self.model
    }
}

/// Incremental parser for the chat-completions event stream.
///
/// Tool calls are keyed by their `index`; `Complete` is held back until
/// the stream ends so a trailing usage-only chunk is included.
#[derive(Default)]
pub(crate) struct ChunkParser {
    buffer: Vec<u8>,
    tool_calls: HashMap<i64, String>,
    finish: Option<FinishReason>,
    usage: TokenUsage,
    done: bool,
}

impl ChunkParser {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<ProviderEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                events.extend(self.complete());
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(data) {
                Ok(json) => self.handle(&json, &mut events),
                Err(e) => tracing::debug!("skipping unparseable model chunk: {e}"),
            }
        }
        events
    }

    pub(crate) fn finish(&mut self) -> Vec<ProviderEvent> {
        self.complete()
    }

    fn handle(&mut self, json: &serde_json::Value, events: &mut Vec<ProviderEvent>) {
        if let Some(err) = json.get("error") {
            events.push(ProviderEvent::Error {
                error: ProviderError::Stream(
                    err["message"].as_str().unwrap_or("unknown error").to_string(),
                ),
            });
            return;
        }

        if let Some(u) = json.get("usage").filter(|u| u.is_object()) {
            self.usage = TokenUsage {
                input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
                output_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
            };
        }

        let Some(choices) = json["choices"].as_array() else {
            return;
        };
        for choice in choices {
            let delta = &choice["delta"];

            let reasoning = delta["reasoning_content"]
                .as_str()
                .or_else(|| delta["reasoning"].as_str());
            if let Some(text) = reasoning.filter(|t| !t.is_empty()) {
                events.push(ProviderEvent::ThinkingDelta {
                    text: text.to_string(),
                });
            }

            if let Some(text) = delta["content"].as_str().filter(|t| !t.is_empty()) {
                events.push(ProviderEvent::ContentDelta {
                    text: text.to_string(),
                });
            }

            for tc in delta["tool_calls"].as_array().into_iter().flatten() {
                let index = tc["index"].as_i64().unwrap_or(0);
                let func = &tc["function"];

                // Some gateways repeat an empty name on later chunks.
                let name = func["name"].as_str().unwrap_or("");
                if !name.is_empty() && !self.tool_calls.contains_key(&index) {
                    let id = tc["id"]
                        .as_str()
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                    self.tool_calls.insert(index, id.clone());
                    events.push(ProviderEvent::ToolUseStart {
                        id,
                        name: name.to_string(),
                    });
                }

                if let (Some(id), Some(args)) =
                    (self.tool_calls.get(&index), func["arguments"].as_str())
                {
                    if !args.is_empty() {
                        events.push(ProviderEvent::ToolUseDelta {
                            id: id.clone(),
                            input_json_chunk: args.to_string(),
                        });
                    }
                }
            }

            if let Some(reason) = choice["finish_reason"].as_str() {
                let mut open: Vec<_> = self.tool_calls.drain().collect();
                open.sort_by_key(|(index, _)| *index);
                for (_, id) in open {
                    events.push(ProviderEvent::ToolUseStop { id });
                }
                self.finish = Some(match reason {
                    "length" => FinishReason::MaxTokens,
                    "tool_calls" => FinishReason::ToolUse,
                    _ => FinishReason::EndTurn,
                });
            }
        }
    }

    fn complete(&mut self) -> Vec<ProviderEvent> {
        if self.done {
            return Vec::new();
        }
        self.done = true;

        let mut events: Vec<_> = self
            .tool_calls
            .drain()
            .map(|(_, id)| ProviderEvent::ToolUseStop { id })
            .collect();
        let finish_reason = self.finish.take().unwrap_or(FinishReason::EndTurn);
        events.push(ProviderEvent::Complete {
            finish_reason,
            usage: std::mem::take(&mut self.usage),
        });
        events
    }
}

pub(crate) fn convert_messages(messages: &[Message], system_prompt: &str) -> Vec<serde_json::Value> {
    let mut result = vec![serde_json::json!({
        "role": "system",
        "content": system_prompt,
    })];

    for msg in messages {
        match msg.role {
            MessageRole::User => {
                let text = msg.text_content();
                if !text.is_empty() {
                    result.push(serde_json::json!({"role": "user", "content": text}));
                }
            }
            MessageRole::Assistant => {
                let mut text = String::new();
                let mut tool_calls = Vec::new();
                for part in &msg.parts {
                    match part {
                        ContentPart::Text { text: t } => text.push_str(t),
                        ContentPart::ToolCall { id, name, input } => {
                            tool_calls.push(serde_json::json!({
                                "id": id,
                                "type": "function",
                                "function": {"name": name, "arguments": input},
                            }));
                        }
                        _ => {}
                    }
                }

                let mut assistant = serde_json::json!({"role": "assistant"});
                if !text.is_empty() {
                    assistant["content"] = serde_json::Value::String(text);
                }
                if !tool_calls.is_empty() {
                    assistant["tool_calls"] = serde_json::json!(tool_calls);
                }
                result.push(assistant);
            }
            MessageRole::Tool => {
                for part in &msg.parts {
                    if let ContentPart::ToolResult {
                        tool_call_id,
                        content,
                        ..
                    } = part
                    {
                        result.push(serde_json::json!({
                            "role": "tool",
                            "tool_call_id": tool_call_id,
                            "content": content,
                        }));
                    }
                }
            }
        }
    }

    result
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            let properties: serde_json::Map<String, serde_json::Value> = t
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::json!(v)))
                .collect();

            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": {
                        "type": "object",
                        "properties": properties,
                        "required": t.required,
                    }
                }
            })
        })
        .collect()
}

/// Exponential backoff with up to 25% jitter.
fn compute_backoff(attempt: u32) -> u64 {
    let base = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = base.min(MAX_BACKOFF_MS);
    let jitter = (capped as f64 * 0.25 * jitter_fraction()) as u64;
    capped + jitter
}

fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
pub(crate) fn backoff_for(attempt: u32) -> u64 {
    compute_backoff(attempt)
}
