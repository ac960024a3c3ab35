use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use relay_core::error::TransportError;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::frame::{done_frame, encode_frame};
use crate::wire::WireEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Open,
    /// A `complete` or `error` frame was written.
    Terminated,
    /// The sentinel was written and the sink shut down.
    Ended,
    /// The connection went away.
    Closed,
}

/// Serializes wire events onto a byte sink, one flushed frame at a time.
///
/// `write` returns only after the frame has been flushed into the sink, so
/// a caller that awaits it knows the frame is in the transport buffer.
/// Cloning shares the same sink.
#[derive(Clone)]
pub struct TransportWriter {
    inner: Arc<Inner>,
}

struct Inner {
    sink: tokio::sync::Mutex<Pin<Box<dyn AsyncWrite + Send>>>,
    state: Mutex<WriterState>,
    closed: CancellationToken,
}

impl TransportWriter {
    pub fn new<W>(sink: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                sink: tokio::sync::Mutex::new(Box::pin(sink)),
                state: Mutex::new(WriterState::Open),
                closed: CancellationToken::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, WriterState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> WriterState {
        *self.lock_state()
    }

    pub fn is_writable(&self) -> bool {
        self.state() == WriterState::Open
    }

    /// Fires when the connection is lost.
    pub fn close_signal(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Records that the reading side is gone.
    pub fn mark_closed(&self) {
        {
            let mut state = self.lock_state();
            if *state != WriterState::Ended {
                *state = WriterState::Closed;
            }
        }
        self.inner.closed.cancel();
    }

    /// Fails with the error a `write` would return in the current state.
    pub fn ensure_open(&self) -> Result<(), TransportError> {
        match self.state() {
            WriterState::Open => Ok(()),
            WriterState::Terminated | WriterState::Ended => Err(TransportError::Ended),
            WriterState::Closed => Err(TransportError::Closed),
        }
    }

    pub async fn write(&self, event: &WireEvent) -> Result<(), TransportError> {
        let mut sink = self.inner.sink.lock().await;
        self.ensure_open()?;

        let frame = encode_frame(event)?;
        if let Err(e) = write_flushed(&mut sink, frame.as_bytes()).await {
            tracing::debug!(kind = event.kind(), "transport write failed: {e}");
            self.mark_closed();
            return Err(TransportError::Io(e.to_string()));
        }

        if event.is_terminal() {
            *self.lock_state() = WriterState::Terminated;
        }
        tracing::trace!(kind = event.kind(), "frame flushed");
        Ok(())
    }

    /// Writes the end-of-stream sentinel and shuts the sink down.
    /// Idempotent once ended.
    pub async fn end(&self) -> Result<(), TransportError> {
        let mut sink = self.inner.sink.lock().await;
        match self.state() {
            WriterState::Ended => return Ok(()),
            WriterState::Closed => return Err(TransportError::Closed),
            WriterState::Open | WriterState::Terminated => {}
        }

        let result = async {
            write_flushed(&mut sink, done_frame().as_bytes()).await?;
            sink.shutdown().await
        }
        .await;

        match result {
            Ok(()) => {
                *self.lock_state() = WriterState::Ended;
                Ok(())
            }
            Err(e) => {
                self.mark_closed();
                Err(TransportError::Io(e.to_string()))
            }
        }
    }
}

async fn write_flushed(
    sink: &mut Pin<Box<dyn AsyncWrite + Send>>,
    bytes: &[u8],
) -> std::io::Result<()> {
    sink.write_all(bytes).await?;
    sink.flush().await
}
