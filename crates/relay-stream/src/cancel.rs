use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use relay_core::event::EventSource;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transport::TransportWriter;
use crate::wire::WireEvent;

pub const ABORTED_MESSAGE: &str = "Request aborted by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Streaming,
    Completed,
    Aborted,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Explicit stop request carrying the session id.
    UserStop,
    /// The transport observed the connection going away.
    Disconnected,
}

/// Coordinates stopping one turn sequence: aborts the source, severs the
/// transport, and releases whoever is reading so it can finalize.
///
/// Only the first transition out of `streaming` takes effect.
pub struct CancellationController {
    session_id: String,
    state: Mutex<ControllerState>,
    source: Option<Arc<dyn EventSource>>,
    writer: Option<TransportWriter>,
    read: CancellationToken,
    settled: CancellationToken,
}

impl CancellationController {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: Mutex::new(ControllerState::Idle),
            source: None,
            writer: None,
            read: CancellationToken::new(),
            settled: CancellationToken::new(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_writer(mut self, writer: TransportWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ControllerState {
        *self.lock_state()
    }

    /// Fires when the read side should stop.
    pub fn read_token(&self) -> CancellationToken {
        self.read.clone()
    }

    pub fn begin(&self) -> bool {
        self.transition(ControllerState::Idle, ControllerState::Streaming)
    }

    /// Records the normal end of the sequence.
    pub fn finish(&self, ok: bool) -> bool {
        let next = if ok {
            ControllerState::Completed
        } else {
            ControllerState::Errored
        };
        let moved = self.transition(ControllerState::Streaming, next);
        if moved {
            self.settled.cancel();
        }
        moved
    }

    fn transition(&self, from: ControllerState, to: ControllerState) -> bool {
        let mut state = self.lock_state();
        if *state != from {
            return false;
        }
        *state = to;
        tracing::debug!(session_id = %self.session_id, ?from, ?to, "controller transition");
        true
    }

    pub async fn abort(&self, reason: AbortReason) -> bool {
        if !self.transition(ControllerState::Streaming, ControllerState::Aborted) {
            return false;
        }
        tracing::info!(session_id = %self.session_id, ?reason, "aborting turn sequence");

        if let Some(source) = &self.source {
            source.abort();
        }
        self.read.cancel();

        if let (Some(writer), AbortReason::UserStop) = (&self.writer, reason) {
            if writer.is_writable() {
                let _ = writer.write(&WireEvent::error(ABORTED_MESSAGE)).await;
            }
            let _ = writer.end().await;
        }
        self.settled.cancel();
        true
    }

    /// Aborts the sequence if the transport reports the connection lost
    /// before the sequence settles.
    pub fn watch_disconnect(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let writer = self.writer.clone()?;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = writer.closed() => {
                    if this.abort(AbortReason::Disconnected).await {
                        tracing::info!(session_id = %this.session_id, "client disconnected mid-stream");
                    }
                }
                _ = this.settled.cancelled() => {}
            }
        }))
    }
}

/// Live sequences of one server, addressable by session id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<CancellationController>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CancellationController>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, controller: Arc<CancellationController>) {
        self.lock()
            .insert(controller.session_id().to_string(), controller);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<CancellationController>> {
        self.lock().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<CancellationController>> {
        self.lock().remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles a stop request; false for unknown or already settled sessions.
    pub async fn abort(&self, session_id: &str) -> bool {
        let Some(controller) = self.get(session_id) else {
            tracing::debug!(session_id, "abort for unknown session");
            return false;
        };
        controller.abort(AbortReason::UserStop).await
    }
}
