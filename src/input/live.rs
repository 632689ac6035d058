//! Live audio capture frontend using cpal.
//!
//! Opens a 2-channel input stream (left = I, right = Q) on the configured
//! device and drives the core straight from the audio callback, which is
//! the pipeline's DSP thread. The run loop just sleeps until the cancel
//! token fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use thiserror::Error;
use tracing::{error, info};

use crate::stream::{BatchInfo, ComplexSample, SampleSink, StreamInfo};
use crate::time::TimeStamp;

/// Device name selecting the system default input.
pub const DEFAULT_DEVICE: &str = "default";

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Audio input device \"{0}\" not found")]
    DeviceNotFound(String),

    #[error("Failed to enumerate audio devices: {0}")]
    DeviceEnumeration(String),

    #[error("Failed to get default input config: {0}")]
    NoInputConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildFailed(String),

    #[error("Failed to start audio stream: {0}")]
    StreamStartFailed(String),
}

/// Captures I/Q from a stereo input device until cancelled.
pub struct LiveFrontend {
    device_name: String,
}

impl LiveFrontend {
    pub fn new(device_name: String) -> Self {
        Self { device_name }
    }

    /// List available audio input devices.
    #[allow(dead_code)]
    pub fn list_devices() -> Vec<String> {
        let host = cpal::default_host();
        host.input_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }

    fn open_device(&self) -> Result<Device, CaptureError> {
        let host = cpal::default_host();

        if self.device_name == DEFAULT_DEVICE {
            return host
                .default_input_device()
                .ok_or(CaptureError::NoInputDevice);
        }

        host.input_devices()
            .map_err(|e| CaptureError::DeviceEnumeration(e.to_string()))?
            .find(|d| d.name().map(|n| n == self.device_name).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(self.device_name.clone()))
    }

    /// Capture until the cancel token is set, then close the stream. The
    /// sink sees exactly one `start_stream`/`end_stream` pair.
    pub fn run<S>(&self, sink: S, cancel: Arc<AtomicBool>) -> Result<(), CaptureError>
    where
        S: SampleSink + Send + 'static,
    {
        let device = self.open_device()?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!("Using audio input device: {}", device_name);

        let supported = device
            .default_input_config()
            .map_err(|e| CaptureError::NoInputConfig(e.to_string()))?;
        let sample_rate = supported.sample_rate();

        let config = StreamConfig {
            channels: 2,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let start_time = TimeStamp::now();
        let sink = Arc::new(Mutex::new(sink));
        sink.lock().unwrap().start_stream(StreamInfo {
            known_length: false,
            length: 0,
            sample_rate,
            time_offset: start_time,
        });

        let callback_sink = Arc::clone(&sink);
        let mut offset: u64 = 0;
        let mut batch: Vec<ComplexSample> = Vec::new();

        let err_fn = |err| error!("Audio stream error: {}", err);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    batch.clear();
                    batch.extend(
                        data.chunks_exact(2)
                            .map(|frame| ComplexSample::new(f64::from(frame[0]), f64::from(frame[1]))),
                    );

                    let info = BatchInfo {
                        offset,
                        time_offset: start_time.add_samples(offset as i64, sample_rate),
                    };
                    offset += batch.len() as u64;

                    callback_sink.lock().unwrap().process(&batch, info);
                },
                err_fn,
                None,
            )
            .map_err(|e| CaptureError::StreamBuildFailed(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CaptureError::StreamStartFailed(e.to_string()))?;
        info!("Live capture started at {} Hz (Ctrl-C stops)", sample_rate);

        while !cancel.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(200));
        }

        // Dropping the stream stops the callback; only then is it safe to
        // close the stream towards the core.
        drop(stream);
        sink.lock().unwrap().end_stream();

        info!("Live capture stopped");
        Ok(())
    }
}
