use crate::openai::{backoff_for, convert_messages, convert_tools, ChunkParser};
use crate::create_provider;
use relay_core::config::AppConfig;
use relay_core::error::ProviderError;
use relay_core::message::*;
use relay_core::model::ModelId;
use relay_core::provider::{Provider, ProviderEvent};
use relay_core::tool::{ParamSchema, ToolDefinition};
use std::collections::HashMap;

fn sse(chunks: &[serde_json::Value]) -> String {
    let mut out: String = chunks.iter().map(|c| format!("data: {c}\n\n")).collect();
    out.push_str("data: [DONE]\n\n");
    out
}

#[test]
fn test_parser_text_and_reasoning() {
    let body = sse(&[
        serde_json::json!({"choices": [{"delta": {"reasoning_content": "think"}}]}),
        serde_json::json!({"choices": [{"delta": {"content": "Hel"}}]}),
        serde_json::json!({"choices": [{"delta": {"content": "lo"}, "finish_reason": "stop"}]}),
        serde_json::json!({"choices": [], "usage": {"prompt_tokens": 7, "completion_tokens": 3}}),
    ]);

    let mut parser = ChunkParser::default();
    let mut events = Vec::new();
    // split mid-line
    let (a, b) = body.as_bytes().split_at(37);
    events.extend(parser.push(a));
    events.extend(parser.push(b));
    events.extend(parser.finish());

    assert_eq!(events.len(), 4);
    assert!(matches!(&events[0], ProviderEvent::ThinkingDelta { text } if text == "think"));
    assert!(matches!(&events[1], ProviderEvent::ContentDelta { text } if text == "Hel"));
    assert!(matches!(&events[2], ProviderEvent::ContentDelta { text } if text == "lo"));
    match &events[3] {
        ProviderEvent::Complete {
            finish_reason,
            usage,
        } => {
            assert_eq!(*finish_reason, FinishReason::EndTurn);
            assert_eq!(usage.input_tokens, 7);
            assert_eq!(usage.output_tokens, 3);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_parser_tool_calls() {
    let body = sse(&[
        serde_json::json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "call_a", "function": {"name": "write", "arguments": ""}}
        ]}}]}),
        serde_json::json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"name": "", "arguments": "{\"path\":"}},
            {"index": 1, "id": "call_b", "function": {"name": "view", "arguments": "{}"}}
        ]}}]}),
        serde_json::json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "\"a.txt\"}"}}
        ]}, "finish_reason": "tool_calls"}]}),
    ]);

    let mut parser = ChunkParser::default();
    let events = parser.push(body.as_bytes());

    let summary: Vec<String> = events
        .iter()
        .map(|e| match e {
            ProviderEvent::ToolUseStart { id, name } => format!("start {id} {name}"),
            ProviderEvent::ToolUseDelta {
                id,
                input_json_chunk,
            } => format!("delta {id} {input_json_chunk}"),
            ProviderEvent::ToolUseStop { id } => format!("stop {id}"),
            ProviderEvent::Complete { finish_reason, .. } => format!("complete {finish_reason:?}"),
            other => format!("{other:?}"),
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            "start call_a write",
            "delta call_a {\"path\":",
            "start call_b view",
            "delta call_b {}",
            "delta call_a \"a.txt\"}",
            "stop call_a",
            "stop call_b",
            "complete ToolUse",
        ]
    );
    assert!(parser.finish().is_empty());
}

#[test]
fn test_parser_error_chunk_and_missing_done() {
    let mut parser = ChunkParser::default();
    let events = parser.push(b": comment\ndata: {\"error\": {\"message\": \"overloaded\"}}\n\n");
    assert!(matches!(
        &events[0],
        ProviderEvent::Error { error: ProviderError::Stream(m) } if m == "overloaded"
    ));

    let mut parser = ChunkParser::default();
    parser.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n");
    let tail = parser.finish();
    assert!(matches!(
        tail.as_slice(),
        [ProviderEvent::Complete {
            finish_reason: FinishReason::EndTurn,
            ..
        }]
    ));
}

#[test]
fn test_convert_messages() {
    let user = Message::new_user("s".into(), "do it".into());
    let mut assistant = Message::new_assistant("s".into(), ModelId("gpt-4o".into()));
    assistant.append_text("ok");
    assistant.add_tool_call("c1".into(), "ls".into(), "{}".into());
    let tool = Message::new_tool_result(
        "s".into(),
        vec![ContentPart::ToolResult {
            tool_call_id: "c1".into(),
            content: "a.txt".into(),
            is_error: false,
        }],
    );

    let converted = convert_messages(&[user, assistant, tool], "system text");
    assert_eq!(converted.len(), 4);
    assert_eq!(converted[0]["role"], "system");
    assert_eq!(converted[1]["content"], "do it");
    assert_eq!(converted[2]["content"], "ok");
    assert_eq!(converted[2]["tool_calls"][0]["function"]["name"], "ls");
    assert_eq!(converted[3]["role"], "tool");
    assert_eq!(converted[3]["tool_call_id"], "c1");
}

#[test]
fn test_convert_tools() {
    let mut parameters = HashMap::new();
    parameters.insert(
        "position".to_string(),
        ParamSchema::one_of("where", &["before_section", "after_section"]),
    );
    let tools = convert_tools(&[ToolDefinition {
        name: "insert_image".into(),
        description: "d".into(),
        parameters,
        required: vec![],
    }]);
    let schema = &tools[0]["function"]["parameters"]["properties"]["position"];
    assert_eq!(schema["type"], "string");
    assert_eq!(schema["enum"][1], "after_section");
}

#[test]
fn test_create_provider_validation() {
    let mut config = AppConfig::default();
    config.api_key = None;
    assert!(matches!(
        create_provider(&config, None),
        Err(ProviderError::MissingApiKey(_))
    ));

    config.api_key = Some("sk-test".into());
    assert!(matches!(
        create_provider(&config, Some(&ModelId("not-a-model".into()))),
        Err(ProviderError::UnsupportedModel(_))
    ));

    let provider = create_provider(&config, Some(&ModelId("z-ai/glm-5".into()))).unwrap();
    assert!(provider.model().supports_thinking);
}

#[test]
fn test_backoff_grows_and_caps() {
    let first = backoff_for(1);
    assert!((2000..=2500).contains(&first));
    let capped = backoff_for(20);
    assert!((60_000..=75_000).contains(&capped));
}
