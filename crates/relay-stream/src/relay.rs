use async_trait::async_trait;
use relay_core::error::TransportError;
use relay_core::event::{EventSink, InternalEvent};

use crate::mapper::map_event;
use crate::transport::TransportWriter;
use crate::wire::WireEvent;

/// Event sink that maps internal events and writes them to one stream.
///
/// Each wire event is flushed before `emit` returns, so the source cannot
/// run ahead of the transport.
pub struct WireRelay {
    writer: TransportWriter,
    session_id: String,
}

impl WireRelay {
    pub fn new(writer: TransportWriter, session_id: impl Into<String>) -> Self {
        Self {
            writer,
            session_id: session_id.into(),
        }
    }

    pub fn writer(&self) -> &TransportWriter {
        &self.writer
    }

    fn stamp(&self, event: WireEvent) -> WireEvent {
        match event {
            WireEvent::AgentStart { session_id: None } => WireEvent::AgentStart {
                session_id: Some(self.session_id.clone()),
            },
            other => other,
        }
    }
}

#[async_trait]
impl EventSink for WireRelay {
    async fn emit(&self, event: InternalEvent) {
        for wire in map_event(&event) {
            let wire = self.stamp(wire);
            match self.writer.write(&wire).await {
                Ok(()) => {}
                Err(TransportError::Ended) => {
                    tracing::debug!(kind = wire.kind(), "event after terminal frame dropped");
                }
                Err(e) => {
                    tracing::debug!(
                        session_id = %self.session_id,
                        kind = wire.kind(),
                        "transport unavailable: {e}"
                    );
                    break;
                }
            }
        }
    }
}
