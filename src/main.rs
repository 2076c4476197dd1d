//! bustap — decode a recorded bus capture into a command trace
//!
//! Reads a capture archive, runs the frame decoder over it, and prints the
//! trace on stdout. Diagnostics go to stderr (filter with RUST_LOG).
//!
//! Usage:
//!   bustap --file capture.zip
//!
//! Limit the decoded range while experimenting:
//!   bustap --file capture.zip --max-samples 100000

use bustap::{CaptureFileSource, FrameDecoder, Pipeline, TraceWriter};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the capture archive
    #[arg(short, long)]
    file: PathBuf,

    /// Cap the number of samples decoded (default: whole capture)
    #[arg(long)]
    max_samples: Option<u64>,

    /// Channel buffer size between pipeline nodes
    #[arg(long, default_value = "100000")]
    buffer_size: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Diagnostics on stderr; stdout carries only the trace
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let source = CaptureFileSource::open(&args.file)?.with_max_samples(args.max_samples);
    let period = source.sample_period();

    info!(
        "Capture: {} samples at {} ({:.3}s)",
        source.total_samples(),
        source.header().samplerate,
        source.capture_duration()
    );

    // An interrupt during the blocking decode terminates the trace with a
    // single newline and exits cleanly. The writer emits whole lines only,
    // so this cannot split one.
    ctrlc::set_handler(|| {
        let mut out = std::io::stdout();
        let _ = out.write_all(b"\n");
        let _ = out.flush();
        std::process::exit(0);
    })?;

    let mut pipeline = Pipeline::new().with_default_buffer_size(args.buffer_size);

    pipeline.add_process("source", source)?;
    pipeline.add_process("decoder", FrameDecoder::new(period))?;
    pipeline.add_process(
        "writer",
        TraceWriter::new(Box::new(std::io::stdout()), period)?,
    )?;

    pipeline.connect("source", "samples", "decoder", "samples")?;
    pipeline.connect("decoder", "events", "writer", "events")?;

    let scheduler = pipeline.build()?;
    scheduler.wait();

    Ok(())
}
