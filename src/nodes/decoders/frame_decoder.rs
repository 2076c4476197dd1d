//! Frame decoder — sample-by-sample sequential design
//!
//! Processes the packed bus samples one at a time using [`Receiver`] over a
//! crossbeam channel.
//!
//! Flow per command span:
//!   1. Wait for PWO to go high with a rising strobe edge → command starts
//!   2. On each strobe edge, latch one bit from the line SYNC selects
//!   3. A SYNC change inside the span flushes the bits latched so far,
//!      so each sub-channel's bits group separately in the trace
//!   4. PWO dropping low flushes whatever is buffered and ends the span
//!
//! All decode state lives in [`DecoderState`] and advances through a single
//! `step()` per sample, so the same machine runs identically inside the node
//! wrapper or driven directly in tests.

use super::types::{Channel, LineLevel, SignalState, SpanEvent, TimingInfo, TraceEvent};
use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkError, WorkResult};
use crate::runtime::sample::RawSample;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Samples consumed per `work()` call before yielding back to the scheduler.
const MAX_SAMPLES_PER_CALL: usize = 4096;

/// Decoding state for the bit-serial bus.
///
/// One instance lives for the whole capture and is stepped once per sample.
/// No state is global; edge detection works off the previous sample's levels
/// held here.
#[derive(Debug)]
pub struct DecoderState {
    /// Seconds per sample, used for elapsed-time metadata only
    sample_period: f64,
    /// Samples since the last latched bit
    since_last: u64,
    /// Strobe level from the previous sample, for edge detection
    last_p2: LineLevel,
    /// SYNC level the buffered bits were latched under; a change flushes
    last_sync: LineLevel,
    /// True while inside a command span
    in_command: bool,
    /// Bits latched since the last flush, first-arrived first
    bits: Vec<bool>,
}

impl DecoderState {
    /// Create a fresh decoder for a stream sampled every `sample_period`
    /// seconds.
    pub fn new(sample_period: f64) -> Self {
        Self {
            sample_period,
            since_last: 0,
            last_p2: LineLevel::Unknown,
            last_sync: LineLevel::Unknown,
            in_command: false,
            bits: Vec::new(),
        }
    }

    /// Whether the decoder is currently inside a command span.
    pub fn in_command(&self) -> bool {
        self.in_command
    }

    /// Number of latched bits awaiting a flush.
    pub fn pending_bits(&self) -> usize {
        self.bits.len()
    }

    fn timing_at(&self, position: u64) -> TimingInfo {
        TimingInfo::new(position as f64 * self.sample_period, position)
    }

    /// Advance the machine by one sample, appending any produced events.
    ///
    /// Transition order per sample: PWO low ends the span (flushing buffered
    /// bits); otherwise a rising strobe edge latches one bit, starting a span
    /// and/or flushing on a SYNC change first. Strobe level and the
    /// since-last-bit counter are updated on every sample regardless.
    pub fn step(&mut self, sample: RawSample, events: &mut Vec<TraceEvent>) {
        let sig = SignalState::from_raw(sample.bits);

        if !sig.pwo {
            if self.in_command {
                self.flush_span(sample.position, events);
            }
            self.in_command = false;
        } else if sig.p2 && self.last_p2 != LineLevel::High {
            if !self.in_command {
                events.push(TraceEvent::CommandStart {
                    elapsed_s: self.since_last as f64 * self.sample_period,
                    timing: self.timing_at(sample.position),
                });
                self.in_command = true;
                self.last_sync = LineLevel::Unknown;
            }

            if self.last_sync != LineLevel::from(sig.sync) {
                self.flush_span(sample.position, events);
                self.last_sync = LineLevel::from(sig.sync);
            }

            let bit = if sig.sync { sig.isa } else { sig.iwa };
            self.bits.push(bit);
            self.since_last = 0;
        }

        self.last_p2 = LineLevel::from(sig.p2);
        self.since_last += 1;
    }

    /// Flush the latched bits into one span event. No-op when empty; the
    /// accumulator is always empty afterwards.
    fn flush_span(&mut self, position: u64, events: &mut Vec<TraceEvent>) {
        if self.bits.is_empty() {
            return;
        }

        let channel = if self.last_sync == LineLevel::High {
            Channel::Control
        } else {
            Channel::Data
        };

        events.push(TraceEvent::Span(SpanEvent {
            channel,
            bits: std::mem::take(&mut self.bits),
            timing: self.timing_at(position),
        }));
    }
}

/// Frame decoder node
///
/// Input: samples — RawSample channel
/// Output: TraceEvent events
pub struct FrameDecoder {
    name: String,
    state: DecoderState,

    /// Putback buffer for the samples input, persisted across work() calls.
    input_buffer: VecDeque<RawSample>,

    /// Scratch vector reused across step() calls.
    events: Vec<TraceEvent>,

    /// Span counter for logging.
    spans_emitted: u64,
}

impl FrameDecoder {
    /// Create a new frame decoder for a stream sampled every `sample_period`
    /// seconds.
    pub fn new(sample_period: f64) -> Self {
        Self {
            name: "frame_decoder".to_string(),
            state: DecoderState::new(sample_period),
            input_buffer: VecDeque::new(),
            events: Vec::new(),
            spans_emitted: 0,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl ProcessNode for FrameDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn input_schema(&self) -> Vec<crate::runtime::ports::PortSchema> {
        use crate::runtime::ports::{PortDirection, PortSchema};
        vec![PortSchema::new::<RawSample>("samples", 0, PortDirection::Input)]
    }

    fn output_schema(&self) -> Vec<crate::runtime::ports::PortSchema> {
        use crate::runtime::ports::{PortDirection, PortSchema};
        vec![PortSchema::new::<TraceEvent>("events", 0, PortDirection::Output)]
    }

    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let output = outputs
            .first()
            .and_then(|p| p.get::<TraceEvent>())
            .ok_or_else(|| WorkError::NodeError("Missing events output".to_string()))?;

        let FrameDecoder {
            name,
            state,
            input_buffer,
            events,
            spans_emitted,
        } = self;

        let mut samples = inputs
            .first()
            .and_then(|p| p.get::<RawSample>(input_buffer))
            .ok_or_else(|| WorkError::NodeError("Missing samples input".to_string()))?;

        let mut emitted = 0usize;

        for _ in 0..MAX_SAMPLES_PER_CALL {
            let raw = match samples.recv() {
                Ok(raw) => raw,
                Err(WorkError::Shutdown) => {
                    // End of the sample stream. Bits without a terminating
                    // PWO drop never became a span; they are dropped, not
                    // guessed at.
                    if state.pending_bits() > 0 {
                        debug!(
                            "[{}] stream ended inside a span, dropping {} unterminated bits",
                            name,
                            state.pending_bits()
                        );
                    }
                    output.close();
                    return Err(WorkError::Shutdown);
                }
                Err(e) => return Err(e),
            };

            state.step(raw, events);

            for event in events.drain(..) {
                match &event {
                    TraceEvent::CommandStart { elapsed_s, timing } => {
                        debug!(
                            "[{}] command start at {:.6}s (+{:.6}s idle)",
                            name, timing.timestamp_s, elapsed_s
                        );
                    }
                    TraceEvent::Span(span) => {
                        *spans_emitted += 1;
                        trace!(
                            "[{}] span #{}: {} bits on {:?} at {:.6}s",
                            name,
                            spans_emitted,
                            span.bits.len(),
                            span.channel,
                            span.timing.timestamp_s
                        );
                    }
                }
                output.send(event)?;
                emitted += 1;
            }
        }

        Ok(emitted)
    }
}
