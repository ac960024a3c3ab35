use std::fmt::Display;

use futures_core::Stream;
use relay_core::error::StreamError;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::frame::{Frame, FrameDecoder};
use crate::reducer::{ReducerStatus, StreamReducer};

/// Reads a byte stream of frames into `reducer` until the stream finishes,
/// fails, or `cancel` fires.
///
/// Cancellation finalizes the reducer as aborted with the partial state it
/// holds. A read failure or an exhausted malformed-frame budget finalizes
/// it as errored and is returned as `Err`; an `error` wire event is a
/// normal ending and returns `Ok`.
pub async fn consume_stream<S, B, E>(
    stream: S,
    reducer: &mut StreamReducer,
    decoder: &mut FrameDecoder,
    cancel: &CancellationToken,
) -> Result<ReducerStatus, StreamError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("stream read cancelled, finalizing partial state");
                reducer.abort();
                return Ok(reducer.status());
            }
            chunk = stream.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                let err = StreamError::Read(e.to_string());
                reducer.fail(err.to_string());
                return Err(err);
            }
            None => break,
        };

        let frames = match decoder.push(bytes.as_ref()) {
            Ok(frames) => frames,
            Err(err) => {
                reducer.fail(err.to_string());
                return Err(err);
            }
        };
        if fold_frames(reducer, frames) {
            return Ok(reducer.status());
        }
    }

    match decoder.finish() {
        Ok(trailing) => {
            fold_frames(reducer, trailing.into_iter().collect());
        }
        Err(err) => {
            reducer.fail(err.to_string());
            return Err(err);
        }
    }

    if !reducer.is_finished() {
        tracing::warn!("stream ended without a terminal event");
        reducer.fail("stream ended before completion");
    }
    Ok(reducer.status())
}

/// Returns true once the reducer has seen a terminal event.
fn fold_frames(reducer: &mut StreamReducer, frames: Vec<Frame>) -> bool {
    for frame in frames {
        match frame {
            Frame::Event(event) => {
                tracing::debug!(kind = event.kind(), "fold");
                reducer.apply(event);
                if reducer.is_finished() {
                    return true;
                }
            }
            Frame::Done => tracing::debug!("end-of-stream sentinel"),
        }
    }
    false
}
