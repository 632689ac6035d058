//! Sliding, overlapping, windowed STFT over a stream of complex samples.
//!
//! The engine buffers incoming I/Q samples into a window of `bins` samples,
//! and each time the window fills it multiplies by a Blackman-Nuttall
//! window function, runs one forward FFT and emits the spectrum. The last
//! `overlap` samples of the window are reused as the start of the next one
//! (overlap-save), so one spectrum comes out every `bins - overlap` samples.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{Fft, FftPlanner};
use thiserror::Error;
use tracing::debug;

use crate::dsp::iq::IqCorrector;
use crate::stream::{BatchInfo, ComplexSample, StreamInfo};
use crate::time::TimeStamp;

#[derive(Error, Debug)]
pub enum FftError {
    #[error("FFT size must be at least 2 (got {0})")]
    BadBins(usize),

    #[error("FFT overlap must be smaller than the FFT size (overlap {overlap}, size {bins})")]
    BadOverlap { bins: usize, overlap: usize },
}

/// Receives one spectrum per hop from the engine.
pub trait SpectrumSink {
    /// `spectrum` holds `bins` unshifted FFT outputs; `info.offset` is the
    /// spectrum index within the stream and `info.time_offset` the time of
    /// the first sample of the window.
    fn process_spectrum(&mut self, spectrum: &[ComplexSample], info: BatchInfo);
}

/// FFT geometry fixed at stream start, plus the frequency mapping helpers
/// recorders need after the engine has moved on.
///
/// Bin indices here are post-fftshift: index 0 is the most negative
/// frequency and index `bins - 1` the most positive.
#[derive(Debug, Clone, Copy)]
pub struct FftParams {
    pub bins: usize,
    pub overlap: usize,
    /// Input sample rate in Hz.
    pub sample_rate: u32,
    /// Number of spectra produced per second (Hz).
    pub fft_sample_rate: f64,
}

impl FftParams {
    /// Distance in samples between successive windows.
    #[allow(dead_code)]
    pub fn hop(&self) -> usize {
        self.bins - self.overlap
    }

    /// Center frequency of a post-shift bin, in Hz.
    pub fn bin_to_frequency(&self, bin: usize) -> f64 {
        f64::from(self.sample_rate) * (2.0 * (bin as f64 / self.bins as f64) - 1.0)
    }

    /// Width of one bin in Hz.
    pub fn bin_width(&self) -> f64 {
        2.0 * f64::from(self.sample_rate) / self.bins as f64
    }

    /// Post-shift bin index closest below `frequency`, clamped to
    /// `[0, bins)`.
    pub fn frequency_to_bin(&self, frequency: f64) -> usize {
        let bin = (self.bins as f64 * 0.5 * (frequency / f64::from(self.sample_rate) + 1.0)).floor();
        if bin < 0.0 {
            0
        } else if bin >= self.bins as f64 {
            self.bins - 1
        } else {
            bin as usize
        }
    }
}

/// Blackman-Nuttall window, indexed 0..n-1.
fn blackman_nuttall(n: usize) -> Vec<f64> {
    const A0: f64 = 0.355768;
    const A1: f64 = 0.487396;
    const A2: f64 = 0.144232;
    const A3: f64 = 0.012604;

    (0..n)
        .map(|i| {
            let x = 2.0 * PI * i as f64 / (n - 1) as f64;
            A0 - A1 * x.cos() + A2 * (2.0 * x).cos() - A3 * (3.0 * x).cos()
        })
        .collect()
}

/// The streaming STFT engine.
///
/// The FFT is planned once at construction and executed once per hop; the
/// hot path performs no allocation.
pub struct FftEngine {
    bins: usize,
    overlap: usize,
    sample_rate: u32,
    fft_sample_rate: f64,

    corrector: IqCorrector,

    window_fn: Vec<f64>,
    /// Incoming sample window, length `bins`.
    window: Vec<ComplexSample>,
    /// Write position inside the window.
    cursor: usize,

    fft: Arc<dyn Fft<f64>>,
    fft_buf: Vec<ComplexSample>,
    fft_scratch: Vec<ComplexSample>,
    /// Per-batch output of the I/Q corrector.
    corrected: Vec<ComplexSample>,

    spectrum_index: u64,
    stream_time: TimeStamp,
}

impl FftEngine {
    pub fn new(bins: usize, overlap: usize) -> Result<Self, FftError> {
        if bins < 2 {
            return Err(FftError::BadBins(bins));
        }
        if overlap >= bins {
            return Err(FftError::BadOverlap { bins, overlap });
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(bins);
        let scratch_len = fft.get_inplace_scratch_len();

        Ok(Self {
            bins,
            overlap,
            sample_rate: StreamInfo::default().sample_rate,
            fft_sample_rate: 0.0,
            corrector: IqCorrector::new(0.0, 0),
            window_fn: Vec::new(),
            window: vec![ComplexSample::default(); bins],
            cursor: 0,
            fft,
            fft_buf: vec![ComplexSample::default(); bins],
            fft_scratch: vec![ComplexSample::default(); scratch_len],
            corrected: Vec::new(),
            spectrum_index: 0,
            stream_time: TimeStamp::default(),
        })
    }

    pub fn params(&self) -> FftParams {
        FftParams {
            bins: self.bins,
            overlap: self.overlap,
            sample_rate: self.sample_rate,
            fft_sample_rate: self.fft_sample_rate,
        }
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.corrector.set_gain(gain);
    }

    pub fn set_phase_shift(&mut self, phase_shift: usize) {
        self.corrector.set_phase_shift(phase_shift);
    }

    pub fn start_stream(&mut self, info: &StreamInfo) {
        let hop = self.bins - self.overlap;

        self.sample_rate = info.sample_rate;
        self.fft_sample_rate = f64::from(info.sample_rate) / hop as f64;
        self.cursor = 0;
        self.spectrum_index = 0;
        self.stream_time = info.time_offset;
        self.window_fn = blackman_nuttall(self.bins);
        self.corrector.reset();

        debug!(
            "FFT stream started: {} bins, {} overlap, {} Hz in, {:.3} Hz out",
            self.bins, self.overlap, self.sample_rate, self.fft_sample_rate
        );
    }

    /// Feed one batch of samples, emitting a spectrum into `sink` for every
    /// completed window. Trailing samples stay buffered for the next call.
    pub fn process(&mut self, data: &[ComplexSample], _info: BatchInfo, sink: &mut dyn SpectrumSink) {
        self.corrected.resize(data.len(), ComplexSample::default());
        self.corrector.process(data, &mut self.corrected);

        let hop = (self.bins - self.overlap) as u64;
        let mut src = 0;

        while self.corrected.len() - src >= self.bins - self.cursor {
            let count = self.bins - self.cursor;
            self.window[self.cursor..].copy_from_slice(&self.corrected[src..src + count]);
            src += count;

            for (dst, (&s, &w)) in self
                .fft_buf
                .iter_mut()
                .zip(self.window.iter().zip(self.window_fn.iter()))
            {
                *dst = s * w;
            }
            self.fft
                .process_with_scratch(&mut self.fft_buf, &mut self.fft_scratch);

            // The spectrum time comes from the absolute hop count rather
            // than a running sum, which would drift by the floor-rounding
            // error of every hop.
            let info = BatchInfo {
                offset: self.spectrum_index,
                time_offset: self
                    .stream_time
                    .add_samples((self.spectrum_index * hop) as i64, self.sample_rate),
            };
            sink.process_spectrum(&self.fft_buf, info);

            self.window.copy_within(self.bins - self.overlap.., 0);
            self.cursor = self.overlap;
            self.spectrum_index += 1;
        }

        let rest = self.corrected.len() - src;
        if rest > 0 {
            self.window[self.cursor..self.cursor + rest].copy_from_slice(&self.corrected[src..]);
            self.cursor += rest;
        }
    }

    /// Drop any buffered tail; no partial spectrum is emitted.
    pub fn end_stream(&mut self) {
        self.cursor = 0;
    }
}
