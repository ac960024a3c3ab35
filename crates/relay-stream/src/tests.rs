use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relay_core::error::{RelayError, StreamError, TransportError};
use relay_core::event::{EventSink, EventSource, InternalEvent, MessageDelta};
use relay_core::message::Message;
use relay_core::tool::{ResultPart, ToolCall, ToolResult};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use super::block::*;
use super::cancel::*;
use super::consumer::consume_stream;
use super::frame::*;
use super::mapper::map_event;
use super::reducer::*;
use super::relay::WireRelay;
use super::transport::*;
use super::wire::*;

fn content(text: &str) -> WireEvent {
    WireEvent::Content { text: text.into() }
}

fn tool_use(id: &str, name: &str, input: serde_json::Value) -> WireEvent {
    WireEvent::ToolUse {
        tool_call_id: id.into(),
        tool_name: name.into(),
        tool_input: input,
    }
}

fn tool_update(id: &str, text: &str) -> WireEvent {
    WireEvent::ToolUpdate {
        tool_call_id: id.into(),
        tool_name: "any".into(),
        content: text.into(),
    }
}

fn tool_result(id: &str, name: &str, text: &str, is_error: bool) -> WireEvent {
    WireEvent::ToolResult {
        tool_call_id: id.into(),
        tool_name: name.into(),
        content: text.into(),
        is_error,
    }
}

fn fold(events: Vec<WireEvent>) -> StreamReducer {
    let mut reducer = StreamReducer::new();
    for event in events {
        reducer.apply(event);
    }
    reducer
}

fn frames_of(events: &[WireEvent]) -> String {
    events.iter().map(|e| encode_frame(e).unwrap()).collect()
}

async fn read_all(mut reader: tokio::io::DuplexStream) -> Vec<Frame> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await.unwrap();
    let mut decoder = FrameDecoder::default();
    decoder.push(&bytes).unwrap()
}

// ---- mapper ----

#[test]
fn test_mapper_silent_events() {
    assert!(map_event(&InternalEvent::TurnStart).is_empty());
    assert!(map_event(&InternalEvent::MessageStart).is_empty());
    assert!(map_event(&InternalEvent::MessageEnd).is_empty());
}

#[test]
fn test_mapper_lifecycle_events() {
    assert_eq!(
        map_event(&InternalEvent::AgentStart),
        vec![WireEvent::AgentStart { session_id: None }]
    );
    assert_eq!(map_event(&InternalEvent::TurnEnd), vec![WireEvent::TurnEnd]);

    let msg = Message::new_user("s".into(), "hi".into());
    assert_eq!(
        map_event(&InternalEvent::AgentEnd {
            messages: vec![msg.clone()]
        }),
        vec![WireEvent::Complete {
            messages: vec![msg]
        }]
    );
}

#[test]
fn test_mapper_message_updates() {
    assert_eq!(map_event(&InternalEvent::text("a")), vec![content("a")]);
    assert_eq!(
        map_event(&InternalEvent::thinking("t")),
        vec![WireEvent::Thinking { text: "t".into() }]
    );
    assert_eq!(
        map_event(&InternalEvent::MessageUpdate {
            event: MessageDelta::Error {
                error_message: "model overloaded".into()
            }
        }),
        vec![WireEvent::error("model overloaded")]
    );

    let call = ToolCall {
        id: "c1".into(),
        name: "write".into(),
        input: r#"{"path":"a.txt"}"#.into(),
    };
    assert_eq!(
        map_event(&InternalEvent::MessageUpdate {
            event: MessageDelta::ToolcallEnd { tool_call: call }
        }),
        vec![tool_use("c1", "write", serde_json::json!({"path": "a.txt"}))]
    );
}

#[test]
fn test_mapper_tool_execution_events() {
    let start = InternalEvent::ToolExecutionStart {
        tool_call_id: "c1".into(),
        tool_name: "edit".into(),
        args: serde_json::json!({"path": "b.rs"}),
    };
    assert_eq!(
        map_event(&start),
        vec![tool_use("c1", "edit", serde_json::json!({"path": "b.rs"}))]
    );

    let update = InternalEvent::ToolExecutionUpdate {
        tool_call_id: "c1".into(),
        tool_name: "edit".into(),
        partial_result: ToolResult::success("half".into()),
    };
    assert_eq!(
        map_event(&update),
        vec![WireEvent::ToolUpdate {
            tool_call_id: "c1".into(),
            tool_name: "edit".into(),
            content: "half".into(),
        }]
    );

    let end = InternalEvent::ToolExecutionEnd {
        tool_call_id: "c1".into(),
        tool_name: "edit".into(),
        result: ToolResult {
            content: vec![
                ResultPart::Text { text: "ok ".into() },
                ResultPart::Image {
                    data: "AAAA".into(),
                    media_type: "image/png".into(),
                },
                ResultPart::Text {
                    text: "done".into(),
                },
            ],
            is_error: false,
            metadata: None,
        },
        is_error: false,
    };
    assert_eq!(
        map_event(&end),
        vec![tool_result("c1", "edit", "ok done", false)]
    );
}

#[test]
fn test_mapped_sequence_folds_into_blocks() {
    let internal = vec![
        InternalEvent::AgentStart,
        InternalEvent::text("a"),
        InternalEvent::text("b"),
        InternalEvent::TurnEnd,
        InternalEvent::AgentEnd { messages: vec![] },
    ];
    let wire: Vec<WireEvent> = internal.iter().flat_map(map_event).collect();
    assert!(matches!(wire.last(), Some(WireEvent::Complete { .. })));

    let output = fold(wire).finish();
    assert_eq!(output.status, ReducerStatus::Completed);
    assert_eq!(
        output.blocks,
        vec![
            ExecutionBlock::Content { text: "ab".into() },
            ExecutionBlock::TurnSeparator { turn_number: 1 },
        ]
    );
    assert_eq!(output.content, "ab");
}

// ---- reducer ----

#[test]
fn test_interleaved_tool_calls_produce_one_record_each() {
    let reducer = fold(vec![
        tool_use("a", "view", serde_json::json!({})),
        tool_use("b", "view", serde_json::json!({})),
        tool_update("a", "1"),
        tool_update("b", "x"),
        tool_use("a", "view", serde_json::json!({"dup": true})),
        tool_update("a", "2"),
        tool_result("b", "view", "bad", true),
        tool_result("a", "view", "12", false),
    ]);

    let records = reducer.tool_calls();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, "a");
    assert_eq!(records[0].status, ToolStatus::Complete);
    assert_eq!(records[0].is_error, Some(false));
    assert_eq!(records[0].tool_input, serde_json::json!({}));
    assert_eq!(records[1].status, ToolStatus::Error);
    assert_eq!(records[1].is_error, Some(true));
    assert!(records.iter().all(|r| r.end_time.is_some()));

    let tool_blocks = reducer
        .blocks()
        .iter()
        .filter(|b| matches!(b, ExecutionBlock::ToolUse { .. }))
        .count();
    assert_eq!(tool_blocks, 2);
}

#[test]
fn test_tool_update_appends_partial_result() {
    let reducer = fold(vec![
        tool_use("a", "view", serde_json::json!({})),
        tool_update("a", "line 1\n"),
        tool_update("a", "line 2\n"),
    ]);
    let record = reducer.tool_call("a").unwrap();
    assert_eq!(record.status, ToolStatus::Running);
    assert_eq!(record.result.as_deref(), Some("line 1\nline 2\n"));
    match &reducer.blocks()[0] {
        ExecutionBlock::ToolUse { result, status, .. } => {
            assert_eq!(result.as_deref(), Some("line 1\nline 2\n"));
            assert_eq!(*status, ToolStatus::Running);
        }
        other => panic!("unexpected block {other:?}"),
    }
}

#[test]
fn test_stale_tool_events_are_ignored() {
    let mut reducer = fold(vec![
        tool_use("a", "view", serde_json::json!({})),
        tool_result("a", "view", "final", false),
    ]);
    assert!(!reducer.apply(tool_update("a", "late")));
    assert!(!reducer.apply(tool_result("a", "view", "again", true)));
    assert!(!reducer.apply(tool_update("ghost", "x")));
    assert!(!reducer.apply(tool_result("ghost", "view", "x", false)));

    let record = reducer.tool_call("a").unwrap();
    assert_eq!(record.result.as_deref(), Some("final"));
    assert_eq!(record.status, ToolStatus::Complete);
    assert!(reducer.tool_call("ghost").is_none());
}

#[test]
fn test_content_merges_until_interrupted() {
    let reducer = fold(vec![
        content("Hello, "),
        content("world."),
        WireEvent::Thinking { text: "hm".into() },
        WireEvent::Thinking { text: "m".into() },
        content("Next"),
        tool_use("t", "view", serde_json::json!({})),
        content(" after"),
    ]);
    assert_eq!(
        reducer.snapshot(),
        vec![
            ExecutionBlock::Content {
                text: "Hello, world.".into()
            },
            ExecutionBlock::Thinking { text: "hmm".into() },
            ExecutionBlock::Content {
                text: "Next".into()
            },
            reducer.tool_call("t").unwrap().to_block(),
            ExecutionBlock::Content {
                text: " after".into()
            },
        ]
    );
    // the open block is not pushed until closed
    assert_eq!(reducer.blocks().len(), 4);
    assert_eq!(reducer.content(), "Hello, world.Next after");
}

#[test]
fn test_file_output_follows_successful_write() {
    let output = fold(vec![
        tool_use("w", "write", serde_json::json!({"path": "src/main.rs", "content": "x"})),
        content("writing"),
        tool_result("w", "write", "Wrote 1 lines", false),
        tool_use("e", "Edit", serde_json::json!({"file_path": "lib.rs"})),
        tool_result("e", "Edit", "Edited", false),
        tool_use("f", "write", serde_json::json!({"path": "fail.rs"})),
        tool_result("f", "write", "denied", true),
        tool_use("v", "view", serde_json::json!({"path": "x.rs"})),
        tool_result("v", "view", "contents", false),
        WireEvent::Complete { messages: vec![] },
    ])
    .finish();

    let files: Vec<_> = output
        .blocks
        .iter()
        .filter_map(|b| match b {
            ExecutionBlock::FileOutput {
                file_path,
                operation,
                tool_call_id,
            } => Some((file_path.as_str(), *operation, tool_call_id.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(
        files,
        vec![
            ("src/main.rs", FileOperation::Write, "w"),
            ("lib.rs", FileOperation::Edit, "e"),
        ]
    );

    // content that was open when the write finished stays ahead of its file block
    assert!(matches!(output.blocks[1], ExecutionBlock::Content { .. }));
    assert!(matches!(output.blocks[2], ExecutionBlock::FileOutput { .. }));
}

#[test]
fn test_turn_separators_count_up() {
    let reducer = fold(vec![
        content("one"),
        WireEvent::TurnEnd,
        WireEvent::TurnEnd,
    ]);
    assert_eq!(
        reducer.blocks()[1..],
        [
            ExecutionBlock::TurnSeparator { turn_number: 1 },
            ExecutionBlock::TurnSeparator { turn_number: 2 },
        ]
    );
}

#[test]
fn test_nothing_is_processed_after_terminal_event() {
    let mut reducer = fold(vec![content("partial"), WireEvent::error("model failed")]);
    assert_eq!(reducer.status(), ReducerStatus::Errored);
    assert_eq!(reducer.error(), Some("model failed"));

    assert!(!reducer.apply(content("more")));
    assert!(!reducer.apply(WireEvent::Complete { messages: vec![] }));
    assert_eq!(reducer.status(), ReducerStatus::Errored);
    assert_eq!(
        reducer.blocks(),
        &[ExecutionBlock::Content {
            text: "partial".into()
        }]
    );
}

#[test]
fn test_abort_freezes_running_tool_and_keeps_content() {
    let mut reducer = fold(vec![
        WireEvent::AgentStart {
            session_id: Some("s-1".into()),
        },
        content("a"),
        content("b"),
        tool_use("t1", "view", serde_json::json!({"path": "x"})),
    ]);
    reducer.abort();
    reducer.abort();

    let output = reducer.finish();
    assert_eq!(output.status, ReducerStatus::Aborted);
    assert_eq!(output.session_id.as_deref(), Some("s-1"));
    assert_eq!(output.blocks.len(), 2);
    assert_eq!(output.blocks[0], ExecutionBlock::Content { text: "ab".into() });
    match &output.blocks[1] {
        ExecutionBlock::ToolUse {
            status, end_time, ..
        } => {
            assert_eq!(*status, ToolStatus::Running);
            assert!(end_time.is_none());
        }
        other => panic!("unexpected block {other:?}"),
    }
}

#[test]
fn test_observer_sees_every_change() {
    let calls = Arc::new(AtomicUsize::new(0));
    let last_len = Arc::new(AtomicUsize::new(0));
    let (c, l) = (calls.clone(), last_len.clone());
    let mut reducer = StreamReducer::new().with_observer(move |blocks| {
        c.fetch_add(1, Ordering::SeqCst);
        l.store(blocks.len(), Ordering::SeqCst);
    });

    reducer.apply(content("x"));
    reducer.apply(content("y"));
    reducer.apply(tool_update("missing", "ignored"));
    reducer.apply(WireEvent::TurnEnd);

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(last_len.load(Ordering::SeqCst), 2);
}

#[test]
fn test_doc_updates_are_collected_in_order() {
    let reducer = fold(vec![
        DocUpdate::append(1, "Intro", "<p>a</p>").into(),
        content("done"),
        DocUpdate::delete(1).into(),
    ]);
    assert_eq!(
        reducer.doc_updates(),
        &[DocUpdate::append(1, "Intro", "<p>a</p>"), DocUpdate::delete(1)]
    );
    assert_eq!(reducer.snapshot().len(), 1);
}

#[test]
fn test_reducer_output_serializes_camel_case() {
    let output = fold(vec![tool_use("a", "view", serde_json::json!({}))]).finish();
    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["toolCalls"][0]["toolName"], "view");
    assert_eq!(json["blocks"][0]["type"], "tool_use");
    assert_eq!(json["blocks"][0]["toolCallId"], "a");
    assert_eq!(json["status"], "streaming");
}

// ---- frames ----

fn every_variant() -> Vec<WireEvent> {
    let mut msg = Message::new_user("s".into(), "hello".into());
    msg.append_text(" there");
    vec![
        WireEvent::AgentStart { session_id: None },
        WireEvent::AgentStart {
            session_id: Some("abc".into()),
        },
        content("héllo \"quoted\"\nnext line"),
        WireEvent::Thinking {
            text: "thinking…".into(),
        },
        tool_use("1", "write", serde_json::json!({"path": "a", "n": [1, 2]})),
        tool_update("1", "partial"),
        tool_result("1", "write", "ok", false),
        WireEvent::TurnEnd,
        WireEvent::Complete {
            messages: vec![msg],
        },
        WireEvent::error("boom"),
        DocUpdate::clear_all().into(),
        DocUpdate::append(2, "T", "<p>c</p>").into(),
        DocUpdate::replace(0, "T", "<p>c</p>").into(),
        DocUpdate::delete(3).into(),
        DocUpdate::insert(1, "T", "<p>c</p>").into(),
        DocUpdate::insert_image(1, "https://x/y.png", "chart", ImagePosition::BeforeSection)
            .into(),
    ]
}

#[test]
fn test_every_variant_round_trips_through_frames() {
    let events = every_variant();
    let mut decoder = FrameDecoder::default();
    let frames = decoder.push(frames_of(&events).as_bytes()).unwrap();
    let decoded: Vec<WireEvent> = frames
        .into_iter()
        .map(|f| match f {
            Frame::Event(e) => e,
            Frame::Done => panic!("unexpected sentinel"),
        })
        .collect();
    assert_eq!(decoded, events);
    assert_eq!(decoder.malformed_count(), 0);
}

#[test]
fn test_wire_json_shape() {
    let json = serde_json::to_value(tool_result("c", "write", "ok", true)).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "type": "tool_result",
            "toolCallId": "c",
            "toolName": "write",
            "content": "ok",
            "isError": true
        })
    );

    let json = serde_json::to_value(WireEvent::from(DocUpdate::insert_image(
        0,
        "u",
        "d",
        ImagePosition::AfterSection,
    )))
    .unwrap();
    assert_eq!(json["type"], "doc_update");
    assert_eq!(json["operation"], "insert_image");
    assert_eq!(json["sectionIndex"], 0);
    assert_eq!(json["imageUrl"], "u");
    assert_eq!(json["position"], "after_section");
    assert!(json.get("title").is_none());

    let turn_end: WireEvent = serde_json::from_str(r#"{"type":"turn_end"}"#).unwrap();
    assert_eq!(turn_end, WireEvent::TurnEnd);
    let complete: WireEvent = serde_json::from_str(r#"{"type":"complete"}"#).unwrap();
    assert_eq!(complete, WireEvent::Complete { messages: vec![] });
}

#[test]
fn test_decoder_handles_split_chunks_and_sse_noise() {
    let payload = format!(
        ": keep-alive\n\nevent: message\r\n{}{}",
        encode_frame(&content("日本語")).unwrap().replace("\n\n", "\r\n\r\n"),
        done_frame()
    );
    let bytes = payload.as_bytes();

    let mut decoder = FrameDecoder::default();
    let mut frames = Vec::new();
    // one byte at a time splits the multi-byte characters
    for b in bytes {
        frames.extend(decoder.push(std::slice::from_ref(b)).unwrap());
    }
    assert_eq!(frames, vec![Frame::Event(content("日本語")), Frame::Done]);
}

#[test]
fn test_decoder_joins_multiline_data() {
    let mut decoder = FrameDecoder::default();
    let frames = decoder
        .push(b"data: {\"type\":\"content\",\ndata: \"text\":\"x\"}\n\n")
        .unwrap();
    assert_eq!(frames, vec![Frame::Event(content("x"))]);
}

#[test]
fn test_decoder_trailing_frame_without_blank_line() {
    let mut decoder = FrameDecoder::default();
    assert!(decoder.push(b"data: {\"type\":\"turn_end\"}").unwrap().is_empty());
    assert_eq!(
        decoder.finish().unwrap(),
        Some(Frame::Event(WireEvent::TurnEnd))
    );
    assert_eq!(decoder.finish().unwrap(), None);
}

#[test]
fn test_malformed_budget() {
    let mut decoder = FrameDecoder::new(10);
    for _ in 0..10 {
        assert!(decoder.push(b"data: {oops\n\n").unwrap().is_empty());
    }
    assert_eq!(decoder.malformed_count(), 10);
    let frames = decoder.push(frames_of(&[content("still fine")]).as_bytes()).unwrap();
    assert_eq!(frames.len(), 1);

    let err = decoder.push(b"data: {\"type\":\"nope\"}\n\n").unwrap_err();
    assert_eq!(
        err,
        StreamError::TooManyMalformedFrames {
            count: 11,
            budget: 10
        }
    );
}

// ---- transport ----

#[tokio::test]
async fn test_transport_writes_flushed_frames_in_order() {
    let (sink, reader) = tokio::io::duplex(64 * 1024);
    let writer = TransportWriter::new(sink);

    writer.write(&content("a")).await.unwrap();
    writer.write(&WireEvent::TurnEnd).await.unwrap();
    writer.end().await.unwrap();
    writer.end().await.unwrap();

    assert_eq!(writer.state(), WriterState::Ended);
    assert_eq!(
        read_all(reader).await,
        vec![
            Frame::Event(content("a")),
            Frame::Event(WireEvent::TurnEnd),
            Frame::Done
        ]
    );
}

#[tokio::test]
async fn test_transport_rejects_writes_after_terminal_event() {
    let (sink, reader) = tokio::io::duplex(64 * 1024);
    let writer = TransportWriter::new(sink);

    writer
        .write(&WireEvent::Complete { messages: vec![] })
        .await
        .unwrap();
    assert_eq!(writer.state(), WriterState::Terminated);
    assert!(!writer.is_writable());
    assert_eq!(
        writer.write(&content("late")).await,
        Err(TransportError::Ended)
    );
    writer.end().await.unwrap();

    let frames = read_all(reader).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1], Frame::Done);
}

#[tokio::test]
async fn test_transport_detects_closed_connection() {
    let (sink, reader) = tokio::io::duplex(1024);
    let writer = TransportWriter::new(sink);
    let signal = writer.close_signal();
    drop(reader);

    let err = writer.write(&content("nobody listening")).await.unwrap_err();
    assert!(matches!(err, TransportError::Io(_)));
    assert_eq!(writer.state(), WriterState::Closed);
    assert!(signal.is_cancelled());
    assert_eq!(writer.write(&content("again")).await, Err(TransportError::Closed));
    assert_eq!(writer.end().await, Err(TransportError::Closed));
}

#[tokio::test]
async fn test_relay_stamps_session_and_drops_after_terminal() {
    let (sink, reader) = tokio::io::duplex(64 * 1024);
    let writer = TransportWriter::new(sink);
    let relay = WireRelay::new(writer.clone(), "sess-9");

    relay.emit(InternalEvent::AgentStart).await;
    relay.emit(InternalEvent::TurnStart).await;
    relay.emit(InternalEvent::text("hi")).await;
    relay.emit(InternalEvent::AgentEnd { messages: vec![] }).await;
    relay.emit(InternalEvent::text("ghost")).await;
    writer.end().await.unwrap();

    assert_eq!(
        read_all(reader).await,
        vec![
            Frame::Event(WireEvent::AgentStart {
                session_id: Some("sess-9".into())
            }),
            Frame::Event(content("hi")),
            Frame::Event(WireEvent::Complete { messages: vec![] }),
            Frame::Done,
        ]
    );
}

// ---- consumer ----

fn chunks(payload: String, size: usize) -> Vec<Result<Vec<u8>, String>> {
    payload
        .into_bytes()
        .chunks(size)
        .map(|c| Ok(c.to_vec()))
        .collect()
}

#[tokio::test]
async fn test_consume_full_stream() {
    let mut payload = frames_of(&[
        WireEvent::AgentStart {
            session_id: Some("s".into()),
        },
        content("a"),
        content("b"),
        WireEvent::TurnEnd,
        WireEvent::Complete { messages: vec![] },
    ]);
    payload.push_str(&done_frame());

    let mut reducer = StreamReducer::new();
    let mut decoder = FrameDecoder::default();
    let status = consume_stream(
        tokio_stream::iter(chunks(payload, 7)),
        &mut reducer,
        &mut decoder,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(status, ReducerStatus::Completed);
    assert_eq!(
        reducer.blocks(),
        &[
            ExecutionBlock::Content { text: "ab".into() },
            ExecutionBlock::TurnSeparator { turn_number: 1 },
        ]
    );
}

#[tokio::test]
async fn test_consume_cancelled_mid_stream_keeps_partial_blocks() {
    let payload = frames_of(&[
        content("a"),
        content("b"),
        tool_use("t1", "write", serde_json::json!({"path": "x"})),
    ]);
    let stream = async_stream::stream! {
        yield Ok::<_, String>(payload.into_bytes());
        std::future::pending::<()>().await;
    };

    let controller = Arc::new(CancellationController::new("s"));
    controller.begin();
    let token = controller.read_token();

    let mut reducer = StreamReducer::new();
    let mut decoder = FrameDecoder::default();
    let aborter = {
        let controller = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            controller.abort(AbortReason::UserStop).await
        })
    };

    let status = consume_stream(stream, &mut reducer, &mut decoder, &token)
        .await
        .unwrap();
    assert!(aborter.await.unwrap());
    assert_eq!(status, ReducerStatus::Aborted);

    let output = reducer.finish();
    assert_eq!(output.blocks[0], ExecutionBlock::Content { text: "ab".into() });
    assert!(matches!(
        output.blocks[1],
        ExecutionBlock::ToolUse {
            status: ToolStatus::Running,
            ..
        }
    ));
}

#[tokio::test]
async fn test_consume_stream_ending_early_is_an_error_state() {
    let payload = frames_of(&[content("half")]) + &done_frame();
    let mut reducer = StreamReducer::new();
    let mut decoder = FrameDecoder::default();
    let status = consume_stream(
        tokio_stream::iter(chunks(payload, 64)),
        &mut reducer,
        &mut decoder,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(status, ReducerStatus::Errored);
    assert_eq!(reducer.error(), Some("stream ended before completion"));
    assert_eq!(reducer.blocks().len(), 1);
}

#[tokio::test]
async fn test_consume_read_error_and_malformed_budget() {
    let items: Vec<Result<Vec<u8>, String>> = vec![
        Ok(frames_of(&[content("x")]).into_bytes()),
        Err("connection reset".into()),
    ];
    let mut reducer = StreamReducer::new();
    let err = consume_stream(
        tokio_stream::iter(items),
        &mut reducer,
        &mut FrameDecoder::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(err, StreamError::Read("connection reset".into()));
    assert_eq!(reducer.status(), ReducerStatus::Errored);
    assert_eq!(reducer.snapshot().len(), 1);

    let garbage = "data: nope\n\n".repeat(3);
    let mut reducer = StreamReducer::new();
    let err = consume_stream(
        tokio_stream::iter(chunks(garbage, 100)),
        &mut reducer,
        &mut FrameDecoder::new(2),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StreamError::TooManyMalformedFrames { count: 3, .. }));
}

// ---- cancellation ----

#[derive(Default)]
struct ScriptedSource {
    script: Vec<InternalEvent>,
    aborted: AtomicBool,
    sinks: Mutex<Vec<Arc<dyn EventSink>>>,
}

#[async_trait]
impl EventSource for ScriptedSource {
    fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.sinks.lock().unwrap().push(sink);
    }

    async fn prompt(&self, _text: String) -> Result<(), RelayError> {
        let sinks = self.sinks.lock().unwrap().clone();
        for event in &self.script {
            if self.aborted.load(Ordering::SeqCst) {
                return Err(RelayError::Cancelled);
            }
            for sink in &sinks {
                sink.emit(event.clone()).await;
            }
        }
        Ok(())
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_user_stop_aborts_source_and_ends_stream() {
    let (sink, reader) = tokio::io::duplex(64 * 1024);
    let writer = TransportWriter::new(sink);
    let source = Arc::new(ScriptedSource::default());
    let controller = CancellationController::new("s1")
        .with_source(source.clone())
        .with_writer(writer.clone());

    assert!(!controller.abort(AbortReason::UserStop).await);
    assert!(controller.begin());
    writer.write(&content("partial")).await.unwrap();

    assert!(controller.abort(AbortReason::UserStop).await);
    assert!(!controller.abort(AbortReason::UserStop).await);
    assert!(!controller.finish(true));
    assert_eq!(controller.state(), ControllerState::Aborted);
    assert!(source.aborted.load(Ordering::SeqCst));
    assert!(controller.read_token().is_cancelled());

    assert_eq!(
        read_all(reader).await,
        vec![
            Frame::Event(content("partial")),
            Frame::Event(WireEvent::error(ABORTED_MESSAGE)),
            Frame::Done,
        ]
    );
}

#[tokio::test]
async fn test_disconnect_aborts_source_without_writing() {
    let (sink, _reader) = tokio::io::duplex(1024);
    let writer = TransportWriter::new(sink);
    let source = Arc::new(ScriptedSource::default());
    let controller = Arc::new(
        CancellationController::new("s2")
            .with_source(source.clone())
            .with_writer(writer.clone()),
    );
    controller.begin();
    let watcher = controller.watch_disconnect().unwrap();

    writer.mark_closed();
    watcher.await.unwrap();

    assert_eq!(controller.state(), ControllerState::Aborted);
    assert!(source.aborted.load(Ordering::SeqCst));
    assert_eq!(writer.state(), WriterState::Closed);
}

#[tokio::test]
async fn test_watcher_exits_when_sequence_settles() {
    let (sink, _reader) = tokio::io::duplex(1024);
    let controller = Arc::new(CancellationController::new("s3").with_writer(TransportWriter::new(sink)));
    controller.begin();
    let watcher = controller.watch_disconnect().unwrap();

    assert!(controller.finish(true));
    watcher.await.unwrap();
    assert_eq!(controller.state(), ControllerState::Completed);
}

#[tokio::test]
async fn test_registry_routes_stop_requests() {
    let registry = SessionRegistry::new();
    assert!(!registry.abort("missing").await);

    let source = Arc::new(ScriptedSource::default());
    let controller = Arc::new(CancellationController::new("live").with_source(source.clone()));
    controller.begin();
    registry.register(controller.clone());
    assert_eq!(registry.len(), 1);

    assert!(registry.abort("live").await);
    assert!(!registry.abort("live").await);
    assert!(source.aborted.load(Ordering::SeqCst));

    registry.remove("live");
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_scripted_source_through_relay_and_reducer() {
    let (sink, reader) = tokio::io::duplex(64 * 1024);
    let writer = TransportWriter::new(sink);
    let source = ScriptedSource {
        script: vec![
            InternalEvent::AgentStart,
            InternalEvent::TurnStart,
            InternalEvent::MessageStart,
            InternalEvent::text("Let me write it."),
            InternalEvent::MessageUpdate {
                event: MessageDelta::ToolcallEnd {
                    tool_call: ToolCall {
                        id: "w1".into(),
                        name: "write".into(),
                        input: r#"{"path":"out.txt","content":"x"}"#.into(),
                    },
                },
            },
            InternalEvent::MessageEnd,
            InternalEvent::ToolExecutionStart {
                tool_call_id: "w1".into(),
                tool_name: "write".into(),
                args: serde_json::json!({"path": "out.txt", "content": "x"}),
            },
            InternalEvent::ToolExecutionEnd {
                tool_call_id: "w1".into(),
                tool_name: "write".into(),
                result: ToolResult::success("Wrote 1 lines".into()),
                is_error: false,
            },
            InternalEvent::TurnEnd,
            InternalEvent::AgentEnd { messages: vec![] },
        ],
        ..Default::default()
    };
    source.subscribe(Arc::new(WireRelay::new(writer.clone(), "seq")));
    source.prompt("go".into()).await.unwrap();
    writer.end().await.unwrap();

    let mut reducer = StreamReducer::new();
    for frame in read_all(reader).await {
        if let Frame::Event(event) = frame {
            reducer.apply(event);
        }
    }
    let output = reducer.finish();
    assert_eq!(output.status, ReducerStatus::Completed);
    assert_eq!(output.session_id.as_deref(), Some("seq"));
    assert_eq!(output.tool_calls.len(), 1);
    assert_eq!(output.tool_calls[0].status, ToolStatus::Complete);
    let kinds: Vec<&str> = output
        .blocks
        .iter()
        .map(|b| match b {
            ExecutionBlock::Content { .. } => "content",
            ExecutionBlock::Thinking { .. } => "thinking",
            ExecutionBlock::ToolUse { .. } => "tool_use",
            ExecutionBlock::FileOutput { .. } => "file_output",
            ExecutionBlock::TurnSeparator { .. } => "turn_separator",
        })
        .collect();
    assert_eq!(kinds, vec!["content", "tool_use", "file_output", "turn_separator"]);
}
