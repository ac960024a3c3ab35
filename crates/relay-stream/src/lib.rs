//! Streaming execution protocol: the wire vocabulary, its frame codec, the
//! server-side mapping and transport, and the client-side reducer that folds
//! a wire stream back into execution blocks.

pub mod block;
pub mod cancel;
pub mod consumer;
pub mod frame;
pub mod mapper;
pub mod reducer;
pub mod relay;
pub mod transport;
pub mod wire;

pub use block::{ExecutionBlock, ToolCallRecord, ToolStatus};
pub use cancel::{AbortReason, CancellationController, ControllerState, SessionRegistry};
pub use consumer::consume_stream;
pub use frame::{encode_frame, Frame, FrameDecoder, DONE_SENTINEL};
pub use mapper::map_event;
pub use reducer::{ReducerOutput, ReducerStatus, StreamReducer};
pub use relay::WireRelay;
pub use transport::TransportWriter;
pub use wire::{DocOperation, DocUpdate, ImagePosition, WireEvent};

#[cfg(test)]
mod tests;
