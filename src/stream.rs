//! Sample-stream metadata and the frontend-to-core interface.

use num_complex::Complex;

use crate::time::TimeStamp;

/// One complex baseband sample: left channel is the in-phase part, right
/// channel the quadrature part. Layout is interleaved re,im, which is what
/// the FFT consumes directly.
pub type ComplexSample = Complex<f64>;

/// Immutable metadata for a sample stream, valid from `start_stream` to
/// `end_stream`.
#[derive(Debug, Clone, Copy)]
pub struct StreamInfo {
    /// Whether the total number of samples is known up front (file input).
    #[allow(dead_code)]
    pub known_length: bool,
    /// Total sample count if known, 0 otherwise.
    #[allow(dead_code)]
    pub length: u64,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Wall-clock time of the first sample.
    pub time_offset: TimeStamp,
}

impl Default for StreamInfo {
    fn default() -> Self {
        Self {
            known_length: false,
            length: 0,
            sample_rate: 48_000,
            time_offset: TimeStamp::default(),
        }
    }
}

/// Per-batch metadata. For spectra the offset counts hops instead of
/// samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchInfo {
    /// Sample count since the start of the stream.
    pub offset: u64,
    /// Wall-clock time of the first sample of the batch; equals
    /// `stream.time_offset + offset / sample_rate`.
    pub time_offset: TimeStamp,
}

/// Accepts batches of complex samples from any frontend.
///
/// Protocol: `start_stream` exactly once, then `process` any number of times
/// with monotonic timestamps, then `end_stream` exactly once. All calls come
/// from the frontend's single DSP thread.
pub trait SampleSink {
    fn start_stream(&mut self, info: StreamInfo);
    fn process(&mut self, data: &[ComplexSample], info: BatchInfo);
    fn end_stream(&mut self);
}
