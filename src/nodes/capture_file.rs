//! Capture file source
//!
//! Provides `CaptureFileSource` - a runtime process node that reads recorded
//! bus captures and streams [`RawSample`]s.
//!
//! A capture is a ZIP archive holding two entries:
//! - `header`: text metadata, one `key = value` per line
//!   (`samplerate = 500 KHz`, `total samples = 12345`)
//! - `samples`: raw bytes, one packed sample per byte at the header's rate
//!
//! The sample bytes are loaded once at open time and streamed in fixed-size
//! chunks per `work()` call; end of capture closes the output so downstream
//! nodes wind down through the normal shutdown path.

use crate::runtime::RawSample;
use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkError, WorkResult};
use crate::{CaptureError, Result};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Samples streamed per `work()` call.
const SAMPLES_PER_CALL: usize = 512;

/// Header information from a capture file
#[derive(Debug, Clone)]
pub struct CaptureHeader {
    /// Sample rate as written in the header (e.g., "500 KHz")
    pub samplerate: String,
    /// Sample rate in Hz
    pub samplerate_hz: f64,
    /// Sample period in seconds (1 / sample_rate)
    pub sample_period: f64,
    /// Total number of samples captured
    pub total_samples: u64,
}

/// Source node that reads a recorded capture and outputs a RawSample stream
///
/// This runtime `ProcessNode` (0 inputs, 1 output) parses the capture's
/// header, loads the sample bytes, and streams them position-stamped. The
/// scheduler drives it by calling `work()` in a loop; once the capture is
/// exhausted the node closes its output and returns `Shutdown`.
///
/// # Example
/// ```ignore
/// let source = CaptureFileSource::open("capture.zip")?;
/// let period = source.sample_period();
/// pipeline.add_process("source", source)?;
/// ```
pub struct CaptureFileSource {
    name: String,
    header: CaptureHeader,
    data: Arc<[u8]>,
    cursor: usize,
    max_samples: Option<u64>,
}

impl CaptureFileSource {
    /// Open a capture file from a path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// Open a capture from any seekable reader (e.g., an in-memory archive)
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let header = Self::parse_header(&mut archive)?;

        let data = {
            let mut entry = archive.by_name("samples").map_err(|e| {
                CaptureError::ParseError(format!("Cannot find samples entry: {}", e))
            })?;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            Arc::<[u8]>::from(buf)
        };

        if (data.len() as u64) < header.total_samples {
            warn!(
                "capture holds {} sample bytes but header claims {}",
                data.len(),
                header.total_samples
            );
        }

        debug!(
            "Capture: {} samples at {} ({:.6}s/sample)",
            header.total_samples, header.samplerate, header.sample_period
        );

        Ok(Self {
            name: "capture_file_source".to_string(),
            header,
            data,
            cursor: 0,
            max_samples: None,
        })
    }

    fn parse_header<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<CaptureHeader> {
        let mut header_file = archive
            .by_name("header")
            .map_err(|e| CaptureError::ParseHeader(format!("Cannot find header file: {}", e)))?;

        let mut header_content = String::new();
        header_file.read_to_string(&mut header_content)?;
        drop(header_file); // Explicitly drop to release archive borrow

        let mut samplerate: Option<String> = None;
        let mut total_samples: Option<u64> = None;

        for line in header_content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(value) = line.strip_prefix("samplerate = ") {
                samplerate = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("total samples = ") {
                total_samples = value.parse().ok();
            }
        }

        let samplerate =
            samplerate.ok_or_else(|| CaptureError::MissingField("samplerate".to_string()))?;
        let total_samples =
            total_samples.ok_or_else(|| CaptureError::MissingField("total samples".to_string()))?;

        let samplerate_hz = Self::parse_sample_rate(&samplerate).ok_or_else(|| {
            CaptureError::ParseHeader(format!("Invalid sample rate: {}", samplerate))
        })?;
        let sample_period = 1.0 / samplerate_hz;

        Ok(CaptureHeader {
            samplerate,
            samplerate_hz,
            sample_period,
            total_samples,
        })
    }

    /// Get the header information
    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    /// Get the total number of samples
    pub fn total_samples(&self) -> u64 {
        self.header.total_samples
    }

    /// Get the sample rate in Hz
    pub fn samplerate_hz(&self) -> f64 {
        self.header.samplerate_hz
    }

    /// Get the sample period in seconds
    pub fn sample_period(&self) -> f64 {
        self.header.sample_period
    }

    /// Get the total capture duration in seconds
    pub fn capture_duration(&self) -> f64 {
        self.header.total_samples as f64 * self.header.sample_period
    }

    /// Set custom name (builder pattern)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Cap the number of samples streamed (for benchmarking)
    pub fn with_max_samples(mut self, max_samples: Option<u64>) -> Self {
        self.max_samples = max_samples;
        self
    }

    /// Number of samples this source will actually stream: bounded by the
    /// header's count, the bytes present, and any configured cap.
    fn effective_samples(&self) -> usize {
        let mut limit = self.header.total_samples.min(self.data.len() as u64);
        if let Some(max) = self.max_samples {
            limit = limit.min(max);
        }
        limit as usize
    }

    /// Parse a sample rate string (e.g., "500 KHz") into Hz
    fn parse_sample_rate(samplerate: &str) -> Option<f64> {
        let parts: Vec<&str> = samplerate.split_whitespace().collect();
        if parts.len() >= 2 {
            if let Ok(value) = parts[0].parse::<f64>() {
                let multiplier = match parts[1] {
                    "GHz" => 1_000_000_000.0,
                    "MHz" => 1_000_000.0,
                    "KHz" | "kHz" => 1_000.0,
                    "Hz" => 1.0,
                    _ => return None,
                };
                return Some(value * multiplier);
            }
        }
        None
    }
}

impl ProcessNode for CaptureFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        0 // Source node
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn output_schema(&self) -> Vec<crate::runtime::ports::PortSchema> {
        use crate::runtime::ports::{PortDirection, PortSchema};
        vec![PortSchema::new::<RawSample>("samples", 0, PortDirection::Output)]
    }

    fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let output = outputs
            .first()
            .and_then(|p| p.get::<RawSample>())
            .ok_or_else(|| WorkError::NodeError("Missing samples output".to_string()))?;

        let limit = self.effective_samples();
        if self.cursor >= limit {
            info!("[{}] capture exhausted after {} samples", self.name, self.cursor);
            output.close();
            return Err(WorkError::Shutdown);
        }

        let end = (self.cursor + SAMPLES_PER_CALL).min(limit);
        for pos in self.cursor..end {
            output.send(RawSample::new(self.data[pos], pos as u64))?;
        }

        let sent = end - self.cursor;
        self.cursor = end;
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sender::ChannelMessage;
    use crate::runtime::{Sender, Watchdog};
    use crossbeam_channel::bounded;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn capture_zip(header: &str, samples: &[u8]) -> Cursor<Vec<u8>> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        zip.start_file("header", opts).unwrap();
        zip.write_all(header.as_bytes()).unwrap();
        zip.start_file("samples", opts).unwrap();
        zip.write_all(samples).unwrap();
        zip.finish().unwrap()
    }

    const HEADER: &str = "samplerate = 500 KHz\ntotal samples = 4\n";

    #[test]
    fn test_parse_sample_rate_valid() {
        assert_eq!(
            CaptureFileSource::parse_sample_rate("50 MHz"),
            Some(50_000_000.0)
        );
        assert_eq!(
            CaptureFileSource::parse_sample_rate("1 GHz"),
            Some(1_000_000_000.0)
        );
        assert_eq!(
            CaptureFileSource::parse_sample_rate("100 kHz"),
            Some(100_000.0)
        );
        assert_eq!(
            CaptureFileSource::parse_sample_rate("500 KHz"),
            Some(500_000.0)
        );
        assert_eq!(CaptureFileSource::parse_sample_rate("1000 Hz"), Some(1000.0));
        assert_eq!(
            CaptureFileSource::parse_sample_rate("2.5 MHz"),
            Some(2_500_000.0)
        );
    }

    #[test]
    fn test_parse_sample_rate_invalid() {
        assert_eq!(CaptureFileSource::parse_sample_rate("invalid"), None);
        assert_eq!(CaptureFileSource::parse_sample_rate("50"), None);
        assert_eq!(CaptureFileSource::parse_sample_rate("MHz 50"), None);
        assert_eq!(CaptureFileSource::parse_sample_rate("50 mhz"), None);
        assert_eq!(CaptureFileSource::parse_sample_rate(""), None);
        assert_eq!(CaptureFileSource::parse_sample_rate("abc MHz"), None);
    }

    #[test]
    fn test_open_valid_capture() {
        let source =
            CaptureFileSource::from_reader(capture_zip(HEADER, &[0x00, 0x30, 0x20, 0x00]))
                .unwrap();

        assert_eq!(source.name(), "capture_file_source");
        assert_eq!(source.num_inputs(), 0);
        assert_eq!(source.num_outputs(), 1);
        assert_eq!(source.total_samples(), 4);
        assert_eq!(source.samplerate_hz(), 500_000.0);
        assert!((source.sample_period() - 0.000002).abs() < 1e-12);
        assert!((source.capture_duration() - 0.000008).abs() < 1e-12);
        assert_eq!(source.header().samplerate, "500 KHz");
    }

    #[test]
    fn test_builder_methods() {
        let source =
            CaptureFileSource::from_reader(capture_zip(HEADER, &[0, 0, 0, 0]))
                .unwrap()
                .with_name("custom_source")
                .with_max_samples(Some(2));

        assert_eq!(source.name(), "custom_source");
        assert_eq!(source.effective_samples(), 2);
    }

    #[test]
    fn test_missing_header_field() {
        let result =
            CaptureFileSource::from_reader(capture_zip("samplerate = 500 KHz\n", &[0x00]));
        assert!(matches!(result, Err(CaptureError::MissingField(_))));

        let result =
            CaptureFileSource::from_reader(capture_zip("total samples = 1\n", &[0x00]));
        assert!(matches!(result, Err(CaptureError::MissingField(_))));
    }

    #[test]
    fn test_invalid_sample_rate_rejected() {
        let result = CaptureFileSource::from_reader(capture_zip(
            "samplerate = 500 Bogons\ntotal samples = 1\n",
            &[0x00],
        ));
        assert!(matches!(result, Err(CaptureError::ParseHeader(_))));
    }

    #[test]
    fn test_missing_samples_entry() {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        zip.start_file("header", opts).unwrap();
        zip.write_all(HEADER.as_bytes()).unwrap();
        let cursor = zip.finish().unwrap();

        let result = CaptureFileSource::from_reader(cursor);
        assert!(matches!(result, Err(CaptureError::ParseError(_))));
    }

    #[test]
    fn test_truncated_capture_streams_what_is_there() {
        // Header claims 4 samples but only 2 bytes are present
        let source = CaptureFileSource::from_reader(capture_zip(HEADER, &[0x00, 0x30])).unwrap();
        assert_eq!(source.effective_samples(), 2);
    }

    #[test]
    fn test_streaming_positions_and_shutdown() {
        let bytes = [0x00, 0x30, 0x20, 0x32];
        let mut source = CaptureFileSource::from_reader(capture_zip(HEADER, &bytes)).unwrap();

        let (tx, rx) = bounded::<ChannelMessage<RawSample>>(64);
        let watchdog = Watchdog::new();
        let outputs = vec![crate::runtime::OutputPort::new_with_watchdog(
            Sender::new(vec![tx]),
            &watchdog,
            "capture_file_source",
            "samples",
        )];

        loop {
            match source.work(&[], &outputs) {
                Ok(_) => {}
                Err(WorkError::Shutdown) => break,
                Err(e) => panic!("unexpected work error: {}", e),
            }
        }

        let mut streamed = Vec::new();
        let mut closed = false;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                ChannelMessage::Item(sample) => streamed.push(sample),
                ChannelMessage::EndOfStream => {
                    closed = true;
                    break;
                }
            }
        }

        assert!(closed, "source must close its output at end of capture");
        assert_eq!(streamed.len(), 4);
        for (i, sample) in streamed.iter().enumerate() {
            assert_eq!(sample.bits, bytes[i]);
            assert_eq!(sample.position, i as u64);
        }
    }
}
