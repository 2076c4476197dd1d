//! Trace writer sink
//!
//! Renders decoded [`TraceEvent`]s as the analyzer's line-oriented text
//! trace:
//!
//! ```text
//! sampling every 0.000002s
//!
//! S +0.002134s
//! C 01 00111010
//! D 11010010
//! ```
//!
//! Every line is rendered into one buffer and written with a single
//! `write_all` plus a flush, so an asynchronous process exit (the CLI's
//! Ctrl-C path) can never leave a partially written line behind.

use crate::nodes::decoders::TraceEvent;
use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkError, WorkResult};
use std::collections::VecDeque;
use std::io::{self, Write};
use tracing::debug;

/// Sink node that renders trace events onto a line-oriented writer
///
/// Input: events — TraceEvent channel
pub struct TraceWriter {
    name: String,
    out: Box<dyn Write + Send>,

    /// Putback buffer for the events input, persisted across work() calls.
    input_buffer: VecDeque<TraceEvent>,

    /// Line counter for logging.
    lines_written: u64,
}

impl TraceWriter {
    /// Create a new trace writer over `out` for a stream sampled every
    /// `sample_period` seconds.
    ///
    /// Writes the `sampling every <period>s` banner immediately, before any
    /// decoding output.
    pub fn new(mut out: Box<dyn Write + Send>, sample_period: f64) -> io::Result<Self> {
        let banner = format!("sampling every {:.6}s\n", sample_period);
        out.write_all(banner.as_bytes())?;
        out.flush()?;

        Ok(Self {
            name: "trace_writer".to_string(),
            out,
            input_buffer: VecDeque::new(),
            lines_written: 0,
        })
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Render one event as its complete output text, newline included. A
    /// command start carries its separating blank line so the whole marker
    /// goes out in one write.
    fn render(event: &TraceEvent) -> String {
        match event {
            TraceEvent::CommandStart { elapsed_s, .. } => {
                format!("\nS +{:.6}s\n", elapsed_s)
            }
            TraceEvent::Span(span) => format!("{}\n", span),
        }
    }
}

impl ProcessNode for TraceWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        0 // Sink
    }

    fn input_schema(&self) -> Vec<crate::runtime::ports::PortSchema> {
        use crate::runtime::ports::{PortDirection, PortSchema};
        vec![PortSchema::new::<TraceEvent>("events", 0, PortDirection::Input)]
    }

    fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
        let TraceWriter {
            name,
            out,
            input_buffer,
            lines_written,
        } = self;

        let mut input = inputs
            .first()
            .and_then(|p| p.get::<TraceEvent>(input_buffer))
            .ok_or_else(|| WorkError::NodeError("Missing events input".to_string()))?;

        let event = match input.recv() {
            Ok(event) => event,
            Err(WorkError::Shutdown) => {
                debug!("[{}] event stream ended after {} lines", name, lines_written);
                let _ = out.flush();
                return Err(WorkError::Shutdown);
            }
            Err(e) => return Err(e),
        };

        let line = Self::render(&event);
        out.write_all(line.as_bytes())
            .map_err(|e| WorkError::NodeError(format!("trace write failed: {}", e)))?;
        out.flush()
            .map_err(|e| WorkError::NodeError(format!("trace flush failed: {}", e)))?;

        *lines_written += 1;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::decoders::{Channel, FrameDecoder, SpanEvent, TimingInfo};
    use crate::nodes::CaptureFileSource;
    use crate::runtime::sender::ChannelMessage;
    use crate::runtime::{Pipeline, Sender, Watchdog};
    use crossbeam_channel::bounded;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use zip::write::SimpleFileOptions;

    /// A Write sink the test can read back after the pipeline tears down.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn span(channel: Channel, pattern: &str) -> TraceEvent {
        TraceEvent::Span(SpanEvent {
            channel,
            bits: pattern.chars().map(|c| c == '1').collect(),
            timing: TimingInfo::new(0.0, 0),
        })
    }

    #[test]
    fn test_banner_written_at_construction() {
        let buf = SharedBuf::default();
        let _writer = TraceWriter::new(Box::new(buf.clone()), 0.000002).unwrap();
        assert_eq!(buf.contents(), "sampling every 0.000002s\n");
    }

    #[test]
    fn test_render_command_start_and_span() {
        let start = TraceEvent::CommandStart {
            elapsed_s: 0.002134,
            timing: TimingInfo::new(0.0, 0),
        };
        assert_eq!(TraceWriter::render(&start), "\nS +0.002134s\n");
        assert_eq!(
            TraceWriter::render(&span(Channel::Data, "1001010101")),
            "D 10 01010101\n"
        );
    }

    #[test]
    fn test_work_writes_events_in_order() {
        let buf = SharedBuf::default();
        let mut writer = TraceWriter::new(Box::new(buf.clone()), 0.000002).unwrap();

        let (tx, rx) = bounded::<ChannelMessage<TraceEvent>>(16);
        let watchdog = Watchdog::new();
        let inputs = vec![crate::runtime::InputPort::new_with_watchdog(
            rx,
            &watchdog,
            "trace_writer",
            "events",
        )];

        tx.send(ChannelMessage::Item(TraceEvent::CommandStart {
            elapsed_s: 0.000006,
            timing: TimingInfo::new(0.0, 3),
        }))
        .unwrap();
        tx.send(ChannelMessage::Item(span(Channel::Control, "01")))
            .unwrap();
        tx.send(ChannelMessage::EndOfStream).unwrap();

        loop {
            match writer.work(&inputs, &[]) {
                Ok(_) => {}
                Err(WorkError::Shutdown) => break,
                Err(e) => panic!("unexpected work error: {}", e),
            }
        }

        assert_eq!(
            buf.contents(),
            "sampling every 0.000002s\n\nS +0.000006s\nC 01\n"
        );
    }

    #[test]
    fn test_pipeline_end_to_end() {
        // A tiny capture: three idle samples, then a two-bit command on the
        // async data line, terminated by PWO dropping.
        let samples: &[u8] = &[0x00, 0x00, 0x00, 0x30, 0x20, 0x32, 0x00];
        let header = "samplerate = 500 KHz\ntotal samples = 7\n";

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        zip.start_file("header", opts).unwrap();
        zip.write_all(header.as_bytes()).unwrap();
        zip.start_file("samples", opts).unwrap();
        zip.write_all(samples).unwrap();
        let capture = zip.finish().unwrap();

        let source = CaptureFileSource::from_reader(capture).unwrap();
        let period = source.sample_period();
        let buf = SharedBuf::default();

        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", source).unwrap();
        pipeline
            .add_process("decoder", FrameDecoder::new(period))
            .unwrap();
        pipeline
            .add_process(
                "writer",
                TraceWriter::new(Box::new(buf.clone()), period).unwrap(),
            )
            .unwrap();
        pipeline
            .connect("source", "samples", "decoder", "samples")
            .unwrap();
        pipeline.connect("decoder", "events", "writer", "events").unwrap();

        let scheduler = pipeline.build().unwrap();
        scheduler.wait();

        assert_eq!(
            buf.contents(),
            "sampling every 0.000002s\n\nS +0.000006s\nD 01\n"
        );
    }

    #[test]
    fn test_sender_destination_introspection() {
        let (tx, _rx) = bounded::<ChannelMessage<TraceEvent>>(4);
        let sender = Sender::new(vec![tx]);
        assert!(sender.is_connected());
        assert_eq!(sender.num_destinations(), 1);

        let unconnected = Sender::<TraceEvent>::new(Vec::new());
        assert!(!unconnected.is_connected());
    }
}
