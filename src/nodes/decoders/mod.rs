//! Protocol decoder nodes
//!
//! Decoders for live data processing using the channel-based architecture.

pub mod frame_decoder;
pub mod types;

// Re-export common types
pub use types::{Channel, LineLevel, SignalState, SpanEvent, TimingInfo, TraceEvent};

// Re-export decoders
pub use frame_decoder::{DecoderState, FrameDecoder};
