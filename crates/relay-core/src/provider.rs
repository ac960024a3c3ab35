use async_trait::async_trait;
use std::pin::Pin;

use crate::error::ProviderError;
use crate::message::{FinishReason, Message, TokenUsage};
use crate::model::Model;
use crate::tool::ToolDefinition;

#[derive(Debug, Clone)]
pub enum ProviderEvent {
    ContentDelta { text: String },
    ThinkingDelta { text: String },
    ToolUseStart { id: String, name: String },
    ToolUseDelta { id: String, input_json_chunk: String },
    ToolUseStop { id: String },
    Complete { finish_reason: FinishReason, usage: TokenUsage },
    Error { error: ProviderError },
}

pub type ProviderEventStream =
    Pin<Box<dyn futures_core::Stream<Item = ProviderEvent> + Send>>;

#[async_trait]
pub trait Provider: Send + Sync {
    async fn stream_response(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<ProviderEventStream, ProviderError>;

    fn model(&self) -> &Model;
}
