//! Per-sample I/Q imperfection correction.
//!
//! Models two front-end hardware flaws: a DC gain offset on the Q channel
//! and an integer-sample phase misalignment between the I and Q channels.

use std::collections::VecDeque;

use crate::stream::ComplexSample;

/// Applies Q-channel gain and phase-shift correction to sample batches.
///
/// The I channel passes through untouched. The Q channel is delayed by
/// `phase_shift` samples through an internal delay line (seeded with zeros),
/// then offset by `gain`. The delay line persists across batches, so a
/// stream can be fed in arbitrarily sized pieces.
pub struct IqCorrector {
    gain: f64,
    phase_shift: usize,
    delay: VecDeque<f64>,
}

impl IqCorrector {
    pub fn new(gain: f64, phase_shift: usize) -> Self {
        let mut delay = VecDeque::with_capacity(phase_shift);
        delay.resize(phase_shift, 0.0);
        Self {
            gain,
            phase_shift,
            delay,
        }
    }

    #[allow(dead_code)]
    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.gain = gain;
    }

    #[allow(dead_code)]
    pub fn phase_shift(&self) -> usize {
        self.phase_shift
    }

    /// Change the phase shift. Resizes the delay line and discards its
    /// contents; do this only between streams.
    pub fn set_phase_shift(&mut self, phase_shift: usize) {
        self.phase_shift = phase_shift;
        self.reset();
    }

    /// Re-seed the delay line with zeros for a new stream.
    pub fn reset(&mut self) {
        self.delay.clear();
        self.delay.resize(self.phase_shift, 0.0);
    }

    /// Correct one batch. `input` and `output` must have equal lengths.
    pub fn process(&mut self, input: &[ComplexSample], output: &mut [ComplexSample]) {
        assert_eq!(input.len(), output.len());

        for (src, dst) in input.iter().zip(output.iter_mut()) {
            dst.re = src.re;
            dst.im = if self.phase_shift == 0 {
                src.im + self.gain
            } else {
                self.delay.push_back(src.im);
                self.delay.pop_front().unwrap_or_default() + self.gain
            };
        }
    }
}
