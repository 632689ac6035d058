//! WAVE file frontend.
//!
//! Reads a stereo RIFF/WAVE file where the left channel carries I and the
//! right channel carries Q, and feeds the samples to the core in fixed-size
//! batches. Timestamps are file-relative (the first sample is at time 0).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use hound::{SampleFormat, WavReader};
use thiserror::Error;
use tracing::{info, warn};

use crate::stream::{BatchInfo, ComplexSample, SampleSink, StreamInfo};
use crate::time::TimeStamp;

/// Frames per batch handed to the core.
const BATCH_FRAMES: usize = 1024;

#[derive(Error, Debug)]
pub enum WavError {
    #[error("Failed to read WAV file: {0}")]
    Read(#[from] hound::Error),

    #[error("Expected 2 channels (I and Q), file has {0}")]
    BadChannels(u16),

    #[error("Unsupported sample format: {bits}-bit {format:?}")]
    BadFormat {
        bits: u16,
        format: hound::SampleFormat,
    },
}

enum PcmFormat {
    Int16,
    Float32,
}

/// Streams one WAV file into a [`SampleSink`].
pub struct WavStream {
    path: PathBuf,
}

impl WavStream {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the whole file, checking `cancel` between batches. The sink
    /// sees exactly one `start_stream`/`end_stream` pair.
    pub fn run(&self, sink: &mut dyn SampleSink, cancel: &AtomicBool) -> Result<(), WavError> {
        let mut reader = WavReader::open(&self.path)?;
        let spec = reader.spec();

        if spec.channels != 2 {
            return Err(WavError::BadChannels(spec.channels));
        }
        let format = match (spec.bits_per_sample, spec.sample_format) {
            (16, SampleFormat::Int) => PcmFormat::Int16,
            (32, SampleFormat::Float) => PcmFormat::Float32,
            (bits, format) => return Err(WavError::BadFormat { bits, format }),
        };

        let frames = u64::from(reader.duration());
        info!(
            "Reading WAV \"{}\": {} Hz, {} frames, {}-bit",
            self.path.display(),
            spec.sample_rate,
            frames,
            spec.bits_per_sample
        );

        let info = StreamInfo {
            known_length: true,
            length: frames,
            sample_rate: spec.sample_rate,
            time_offset: TimeStamp::default(),
        };
        sink.start_stream(info);

        // Samples come interleaved left,right; they pass through as raw
        // amplitudes.
        match format {
            PcmFormat::Int16 => feed(
                reader.samples::<i16>().map(|r| r.map(f64::from)),
                &info,
                sink,
                cancel,
            ),
            PcmFormat::Float32 => feed(
                reader.samples::<f32>().map(|r| r.map(f64::from)),
                &info,
                sink,
                cancel,
            ),
        }

        sink.end_stream();
        Ok(())
    }
}

/// Pair interleaved channel values into complex samples and push them in
/// batches. A decode error aborts the stream with a warning; the caller
/// still closes it.
fn feed<I>(mut values: I, info: &StreamInfo, sink: &mut dyn SampleSink, cancel: &AtomicBool)
where
    I: Iterator<Item = Result<f64, hound::Error>>,
{
    let mut batch: Vec<ComplexSample> = Vec::with_capacity(BATCH_FRAMES);
    let mut offset: u64 = 0;

    loop {
        let i = match values.next() {
            Some(Ok(value)) => value,
            Some(Err(e)) => {
                warn!("WAV decode error at frame {}: {}; aborting stream", offset, e);
                break;
            }
            None => break,
        };
        let q = match values.next() {
            Some(Ok(value)) => value,
            Some(Err(e)) => {
                warn!("WAV decode error at frame {}: {}; aborting stream", offset, e);
                break;
            }
            None => {
                warn!("WAV data ends mid-frame; dropping the unpaired sample");
                break;
            }
        };
        batch.push(ComplexSample::new(i, q));

        if batch.len() == BATCH_FRAMES {
            flush(&mut batch, &mut offset, info, sink);
            if cancel.load(Ordering::SeqCst) {
                info!("WAV streaming cancelled at frame {}", offset);
                return;
            }
        }
    }

    if !batch.is_empty() {
        flush(&mut batch, &mut offset, info, sink);
    }
}

fn flush(
    batch: &mut Vec<ComplexSample>,
    offset: &mut u64,
    info: &StreamInfo,
    sink: &mut dyn SampleSink,
) {
    let batch_info = BatchInfo {
        offset: *offset,
        time_offset: info
            .time_offset
            .add_samples(*offset as i64, info.sample_rate),
    };
    sink.process(batch, batch_info);
    *offset += batch.len() as u64;
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that records the call protocol and totals.
    #[derive(Default)]
    struct Trace {
        started: Option<StreamInfo>,
        batches: Vec<(u64, usize)>,
        samples: Vec<ComplexSample>,
        ended: bool,
    }

    impl SampleSink for Trace {
        fn start_stream(&mut self, info: StreamInfo) {
            self.started = Some(info);
        }

        fn process(&mut self, data: &[ComplexSample], info: BatchInfo) {
            self.batches.push((info.offset, data.len()));
            self.samples.extend_from_slice(data);
        }

        fn end_stream(&mut self) {
            self.ended = true;
        }
    }

    fn write_wav(path: &std::path::Path, frames: u32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for n in 0..frames {
            writer.write_sample((n % 1000) as i16).unwrap(); // I
            writer.write_sample(-((n % 1000) as i16)).unwrap(); // Q
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_batching_and_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iq.wav");
        write_wav(&path, 2500);

        let mut trace = Trace::default();
        let cancel = AtomicBool::new(false);
        WavStream::new(path).run(&mut trace, &cancel).unwrap();

        let info = trace.started.unwrap();
        assert!(info.known_length);
        assert_eq!(info.length, 2500);
        assert_eq!(info.sample_rate, 48_000);
        assert!(trace.ended);

        // 1024 + 1024 + 452
        assert_eq!(trace.batches, vec![(0, 1024), (1024, 1024), (2048, 452)]);

        // Raw amplitude pass-through, Q mirrored
        assert_eq!(trace.samples[5].re, 5.0);
        assert_eq!(trace.samples[5].im, -5.0);
    }

    #[test]
    fn test_rejects_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();

        let mut trace = Trace::default();
        let cancel = AtomicBool::new(false);
        let err = WavStream::new(path).run(&mut trace, &cancel).unwrap_err();
        assert!(matches!(err, WavError::BadChannels(1)));
        // The stream never started
        assert!(trace.started.is_none());
    }

    #[test]
    fn test_cancel_stops_midway_but_closes_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iq.wav");
        write_wav(&path, 10_000);

        let mut trace = Trace::default();
        let cancel = AtomicBool::new(true);
        WavStream::new(path).run(&mut trace, &cancel).unwrap();

        // One batch went through before the token was noticed
        assert_eq!(trace.batches.len(), 1);
        assert!(trace.ended);
    }
}
