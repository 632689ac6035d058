//! Waterfall library exports for integration tests.
//!
//! The binary in `main.rs` is the real interface; these re-exports let the
//! end-to-end tests drive the pipeline without going through the CLI.

pub mod channel;
pub mod config;
pub mod dsp;
pub mod fits;
pub mod input;
pub mod ring;
pub mod snapshot;
pub mod stream;
pub mod time;
pub mod waterfall;

// Re-export commonly used types for convenience
pub use config::Config;
pub use snapshot::SnapshotRecorder;
pub use stream::{BatchInfo, ComplexSample, SampleSink, StreamInfo};
pub use time::TimeStamp;
pub use waterfall::{CoreConfig, WaterfallCore};
