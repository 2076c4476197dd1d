//! Bit-serial bus protocol analyzer with a streaming node-based API
//!
//! This library decodes a multi-line hardware bus from a stream of packed
//! digital samples: it recognizes command boundaries on the power/valid
//! line, latches bits on strobe edges from whichever data line the
//! channel-select picks, and renders the result as a line-oriented trace
//! with inter-command timing.
//!
//! # Architecture
//!
//! - **CaptureFileSource**: Streams samples from recorded capture archives
//! - **FrameDecoder**: The sample-to-frame decoding state machine
//! - **TraceWriter**: Renders decoded events as trace text
//! - **Runtime**: Thread-per-node execution with crossbeam channels
//!
//! # Example
//!
//! ```no_run
//! use bustap::{CaptureFileSource, FrameDecoder, Pipeline, TraceWriter};
//!
//! let source = CaptureFileSource::open("capture.zip")?;
//! let period = source.sample_period();
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.add_process("source", source)?;
//! pipeline.add_process("decoder", FrameDecoder::new(period))?;
//! pipeline.add_process(
//!     "writer",
//!     TraceWriter::new(Box::new(std::io::stdout()), period)?,
//! )?;
//! pipeline.connect("source", "samples", "decoder", "samples")?;
//! pipeline.connect("decoder", "events", "writer", "events")?;
//! pipeline.build()?.wait();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use thiserror::Error;

pub mod nodes;
pub mod runtime;

// Re-export decoder data types
pub use nodes::decoders::{
    Channel, DecoderState, LineLevel, SignalState, SpanEvent, TimingInfo, TraceEvent,
};

// Re-export data types from runtime
pub use runtime::RawSample;

// Re-export streaming nodes
pub use nodes::{CaptureFileSource, CaptureHeader, TraceWriter};

// Re-export streaming decoders
pub use nodes::decoders::FrameDecoder;

// Re-export streaming runtime components
pub use runtime::{
    ConnectionError, InputPort, OutputPort, Pipeline, PortDirection, PortSchema, ProcessNode,
    Scheduler, WorkError, WorkResult, register_type,
};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Header parsing error: {0}")]
    ParseHeader(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
