//! Sample stream frontends: WAVE files and live audio capture.

pub mod live;
pub mod wav;

pub use live::{CaptureError, LiveFrontend};
pub use wav::{WavError, WavStream};
