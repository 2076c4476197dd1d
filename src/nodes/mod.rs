//! Node-based signal processing system
//!
//! This module provides a streaming node graph system for decoding sampled
//! bus traffic:
//! - **Nodes**: Computation units that process samples
//! - **Channels**: Crossbeam channels for inter-node communication
//! - **Scheduler**: Thread-per-node runtime for parallel execution
//! - **Decoders**: The bit-serial frame decoder
//!
//! # Architecture
//!
//! The streaming architecture uses thread-per-node execution:
//! - Source nodes produce samples (capture files)
//! - Process nodes transform data (decoders)
//! - Sink nodes consume results (trace writers)
//! - All connected via crossbeam MPSC channels

pub mod decoders;

mod capture_file;
mod trace_writer;

pub use capture_file::{CaptureFileSource, CaptureHeader};
pub use trace_writer::TraceWriter;

// Re-export RawSample from runtime
pub use crate::runtime::RawSample;
