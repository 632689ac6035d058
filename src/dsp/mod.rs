//! Streaming DSP: I/Q conditioning and the sliding windowed FFT.

pub mod fft;
pub mod iq;

pub use fft::{FftEngine, FftError, FftParams, SpectrumSink};
pub use iq::IqCorrector;
