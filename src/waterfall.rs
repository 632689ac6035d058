//! The waterfall core: spectra in, magnitude rows out, recorders driven.
//!
//! Owns the shared ring state and the set of attached recorders. The DSP
//! thread pushes one fftshifted magnitude row per spectrum; recorders get an
//! `update()` after every row and carve the ring into output tiles on their
//! own writer threads.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::dsp::{FftEngine, FftError, FftParams, SpectrumSink};
use crate::ring::ChunkedRing;
use crate::stream::{BatchInfo, ComplexSample, SampleSink, StreamInfo};
use crate::time::TimeStamp;

/// Ring of magnitude rows plus the parallel ring of row timestamps, shared
/// between the DSP thread and writer threads under one mutex.
pub struct WaterfallState {
    pub ring: ChunkedRing<f32>,
    times: Vec<TimeStamp>,
}

impl WaterfallState {
    /// Timestamp of the row stored at `index mod capacity`.
    pub fn row_time(&self, index: u64) -> TimeStamp {
        self.times[(index % self.ring.capacity() as u64) as usize]
    }
}

pub type SharedState = Arc<Mutex<WaterfallState>>;

/// Everything a recorder needs to run, handed over when the stream starts.
pub struct RecorderContext {
    pub state: SharedState,
    pub params: FftParams,
    pub origin: String,
    pub output_dir: PathBuf,
}

/// A consumer of waterfall rows (snapshot recording, in this crate).
///
/// Lifecycle per stream: `request_buffer_size` first (the core sizes the
/// ring to the largest request), then `start` (spawn the writer), then
/// `update` once per appended row from the DSP thread, then `stop` (flush
/// and join).
pub trait Recorder: Send {
    fn request_buffer_size(&mut self, params: &FftParams) -> usize;
    fn start(&mut self, ctx: RecorderContext) -> std::io::Result<()>;
    fn update(&mut self);
    fn stop(&mut self);
}

/// Configuration of the core, straight from the config file.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub origin: String,
    pub bins: usize,
    pub overlap: usize,
    /// Ring chunk size limit in bytes.
    pub chunk_size: usize,
    pub output_dir: PathBuf,
    pub iq_gain: f64,
    pub iq_phase_shift: usize,
}

/// The streaming core. Implements [`SampleSink`], so any frontend can feed
/// it; internally chains the I/Q corrector, the FFT engine and the ring.
pub struct WaterfallCore {
    engine: FftEngine,
    inner: CoreInner,
}

/// The part of the core the FFT engine emits into. Split from the engine so
/// `process` can borrow both at once.
struct CoreInner {
    state: SharedState,
    recorders: Vec<Box<dyn Recorder>>,
    origin: String,
    output_dir: PathBuf,
}

impl WaterfallCore {
    pub fn new(config: CoreConfig) -> Result<Self, FftError> {
        let mut engine = FftEngine::new(config.bins, config.overlap)?;
        engine.set_gain(config.iq_gain);
        engine.set_phase_shift(config.iq_phase_shift);

        let state = Arc::new(Mutex::new(WaterfallState {
            ring: ChunkedRing::new(config.bins, config.chunk_size),
            times: Vec::new(),
        }));

        Ok(Self {
            engine,
            inner: CoreInner {
                state,
                recorders: Vec::new(),
                origin: config.origin,
                output_dir: config.output_dir,
            },
        })
    }

    pub fn add_recorder(&mut self, recorder: Box<dyn Recorder>) {
        self.inner.recorders.push(recorder);
    }

    #[allow(dead_code)]
    pub fn params(&self) -> FftParams {
        self.engine.params()
    }

    /// Handle to the shared ring state (recorders get their own through
    /// [`RecorderContext`]).
    #[allow(dead_code)]
    pub fn state(&self) -> SharedState {
        Arc::clone(&self.inner.state)
    }
}

impl SampleSink for WaterfallCore {
    fn start_stream(&mut self, info: StreamInfo) {
        self.engine.start_stream(&info);
        let params = self.engine.params();

        let mut rows = 1;
        for recorder in &mut self.inner.recorders {
            rows = rows.max(recorder.request_buffer_size(&params));
        }

        {
            let mut state = self.inner.state.lock().unwrap();
            state.ring.resize(rows);
            let capacity = state.ring.capacity();
            state.times.clear();
            state.times.resize(capacity, TimeStamp::default());
        }

        info!(
            "Stream started: {} Hz, {} bins, buffering {} rows",
            info.sample_rate, params.bins, rows
        );

        for recorder in &mut self.inner.recorders {
            if let Err(e) = recorder.start(RecorderContext {
                state: Arc::clone(&self.inner.state),
                params,
                origin: self.inner.origin.clone(),
                output_dir: self.inner.output_dir.clone(),
            }) {
                // Thread spawn only fails on resource exhaustion; nothing
                // sensible can continue from here.
                panic!("failed to start recorder: {e}");
            }
        }
    }

    fn process(&mut self, data: &[ComplexSample], info: BatchInfo) {
        self.engine.process(data, info, &mut self.inner);
    }

    fn end_stream(&mut self) {
        self.engine.end_stream();
        for recorder in &mut self.inner.recorders {
            recorder.stop();
        }
        info!("Stream ended");
    }
}

impl SpectrumSink for CoreInner {
    fn process_spectrum(&mut self, spectrum: &[ComplexSample], info: BatchInfo) {
        {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;

            let index = state.ring.mark();
            let row = state.ring.push();

            // fftshift while taking magnitudes: bins 0..N/2 are the
            // non-negative frequencies and land in the upper half of the
            // row, bins N/2..N are the negative ones and come first.
            let half = spectrum.len() / 2;
            for (i, value) in spectrum[..half].iter().enumerate() {
                row[half + i] = value.norm() as f32;
            }
            for (i, value) in spectrum[half..].iter().enumerate() {
                row[i] = value.norm() as f32;
            }

            state.times[index as usize] = info.time_offset;
        }

        for recorder in &mut self.recorders {
            recorder.update();
        }
    }
}
