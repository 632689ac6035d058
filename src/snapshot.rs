//! Snapshot recording: fixed-duration spectrogram tiles written to FITS.
//!
//! The recorder watches the ring fill level from the DSP thread. Every time
//! a tile's worth of rows (plus a two-row safety margin) is available it
//! reserves the range and hands a descriptor to its writer thread, which
//! copies the rows out and writes one FITS file per snapshot. If the writer
//! falls behind until the producer laps the reservation, the tile is written
//! anyway and flagged with a warning; the DSP thread is never slowed down.

use std::io;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use tracing::{debug, error, info, warn};

use crate::channel;
use crate::dsp::FftParams;
use crate::fits::FitsWriter;
use crate::ring::ReservationHandle;
use crate::time::TimeStamp;
use crate::waterfall::{Recorder, RecorderContext, SharedState};

/// Rows the producer must be ahead of a pending tile before it is queued.
/// Keeps the writer reading behind the producer with a little slack.
const UPDATE_MARGIN: usize = 2;

/// Descriptor of one queued tile: a reserved range of ring rows.
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    /// Absolute index of the first row.
    start: u64,
    /// Number of rows; at most one tile's worth.
    length: u32,
    reservation: ReservationHandle,
}

/// Records the waterfall as a sequence of fixed-duration FITS tiles.
pub struct SnapshotRecorder {
    /// Tile duration in seconds.
    snapshot_length: f32,
    left_freq: f32,
    right_freq: f32,

    /// Rows per full tile, derived from the FFT output rate at start.
    snapshot_rows: usize,
    next_start: u64,

    state: Option<SharedState>,
    tx: Option<channel::Sender<Snapshot>>,
    worker: Option<JoinHandle<()>>,
}

impl SnapshotRecorder {
    /// `left_freq == right_freq` selects the full band.
    pub fn new(snapshot_length: f32, left_freq: f32, right_freq: f32) -> Self {
        Self {
            snapshot_length,
            left_freq: left_freq.min(right_freq),
            right_freq: left_freq.max(right_freq),
            snapshot_rows: 0,
            next_start: 0,
            state: None,
            tx: None,
            worker: None,
        }
    }

    /// Reserve the next pending range and build its descriptor, or None if
    /// fewer than `min_rows` rows are waiting.
    fn take_snapshot(&mut self, min_rows: usize) -> Option<Snapshot> {
        let state = self.state.as_ref()?;
        let mut guard = state.lock().unwrap();

        if guard.ring.is_empty() {
            return None;
        }
        let available = guard.ring.rows_since(self.next_start);
        if available < min_rows {
            return None;
        }

        let length = available.min(self.snapshot_rows);
        let end = self.next_start + length as u64;
        let reservation = guard.ring.reserve(self.next_start, end);

        Some(Snapshot {
            start: self.next_start,
            length: length as u32,
            reservation,
        })
    }

    fn enqueue(&mut self, snapshot: Snapshot) {
        if let Some(tx) = &self.tx {
            tx.send(snapshot);
        }
        self.next_start = snapshot.start + u64::from(snapshot.length);
    }
}

impl Recorder for SnapshotRecorder {
    fn request_buffer_size(&mut self, params: &FftParams) -> usize {
        self.snapshot_rows = (f64::from(self.snapshot_length) * params.fft_sample_rate)
            .ceil()
            .max(1.0) as usize;

        debug!(
            "Snapshot: {} s per tile, {:.3} rows/s, {} rows per tile",
            self.snapshot_length, params.fft_sample_rate, self.snapshot_rows
        );

        // Factor 8 of slack so the writer can lag without being lapped.
        self.snapshot_rows * 8
    }

    fn start(&mut self, ctx: RecorderContext) -> io::Result<()> {
        let (left_bin, right_bin, left_freq, right_freq) = if self.left_freq == self.right_freq {
            // Full band
            let rate = ctx.params.sample_rate as f32;
            (0, ctx.params.bins, -rate, rate)
        } else {
            (
                ctx.params.frequency_to_bin(f64::from(self.left_freq)),
                ctx.params.frequency_to_bin(f64::from(self.right_freq)),
                self.left_freq,
                self.right_freq,
            )
        };
        self.left_freq = left_freq;
        self.right_freq = right_freq;
        self.next_start = 0;
        self.state = Some(ctx.state.clone());

        let (tx, rx) = channel::unbounded();
        self.tx = Some(tx);

        let writer = TileWriter {
            state: ctx.state,
            rx,
            origin: ctx.origin,
            output_dir: ctx.output_dir,
            left_bin,
            right_bin,
            right_freq,
            fft_sample_rate: ctx.params.fft_sample_rate,
            bin_width: ctx.params.bin_width(),
        };
        self.worker = Some(
            std::thread::Builder::new()
                .name("snapshot-writer".to_string())
                .spawn(move || writer.run())?,
        );

        Ok(())
    }

    /// Called from the DSP thread after every appended row.
    fn update(&mut self) {
        while let Some(snapshot) = self.take_snapshot(self.snapshot_rows + UPDATE_MARGIN) {
            self.enqueue(snapshot);
        }
    }

    fn stop(&mut self) {
        // Flush the remaining partial tile, if any rows are still pending.
        if let Some(snapshot) = self.take_snapshot(1) {
            self.enqueue(snapshot);
        }

        // Closing the channel lets the writer drain and exit.
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Snapshot writer thread panicked");
            }
        }
        self.state = None;
    }
}

/// The writer-thread half: receives descriptors, copies the reserved rows
/// out of the ring and writes one FITS file per snapshot.
struct TileWriter {
    state: SharedState,
    rx: channel::Receiver<Snapshot>,
    origin: String,
    output_dir: PathBuf,
    left_bin: usize,
    right_bin: usize,
    right_freq: f32,
    fft_sample_rate: f64,
    bin_width: f64,
}

impl TileWriter {
    fn run(self) {
        info!("Snapshot writer started");

        let mut batch = Vec::new();
        while self.rx.drain(&mut batch) {
            for snapshot in batch.drain(..) {
                self.write_tile(snapshot);

                let mut guard = self.state.lock().unwrap();
                guard.ring.free_reservation(snapshot.reservation);
            }
        }

        info!("Snapshot writer stopped");
    }

    fn write_tile(&self, snapshot: Snapshot) {
        let width = self.right_bin - self.left_bin;
        let length = snapshot.length as usize;
        let mut data = vec![0f32; width * length];

        // Copy the rows out under the lock; a stable row pointer cannot
        // outlive it. The dirty check comes after the copy so an overrun
        // during the copy is caught as well.
        let (first_row_time, dirty) = {
            let guard = self.state.lock().unwrap();
            for y in 0..length {
                let row = guard.ring.at(snapshot.start + y as u64);
                data[y * width..(y + 1) * width]
                    .copy_from_slice(&row[self.left_bin..self.right_bin]);
            }
            (
                guard.row_time(snapshot.start),
                guard.ring.is_dirty(snapshot.reservation),
            )
        };

        if dirty {
            warn!(
                "Snapshot overrun: writer fell behind and rows {}..{} were overwritten; tile may be corrupted",
                snapshot.start,
                snapshot.start + u64::from(snapshot.length)
            );
        }

        let file_name = format!(
            "snapshot_{}_{}.fits",
            self.origin,
            first_row_time.format("%Y_%m_%d_%H_%M_%S", false)
        );
        let path = self.output_dir.join(file_name);
        info!("Writing snapshot \"{}\"...", path.display());

        // A failed tile is logged and skipped; later snapshots open their
        // own files and are unaffected.
        if let Err(e) = self.write_fits(&path, &data, width, length, first_row_time) {
            error!("Failed to write snapshot \"{}\": {}", path.display(), e);
            return;
        }

        debug!("Finished writing snapshot");
    }

    fn write_fits(
        &self,
        path: &Path,
        data: &[f32],
        width: usize,
        length: usize,
        first_row_time: TimeStamp,
    ) -> io::Result<()> {
        let mut writer = FitsWriter::create(path)?;
        writer.create_image(width, length);

        writer.comment(&format!(
            "File created by {} {}.",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ));
        writer.write_key_str("ORIGIN", &self.origin, "");
        writer.date();
        writer.comment(&TimeStamp::now().format("Local time: %Y-%m-%d %H:%M:%S %Z", true));
        writer.write_key_str(
            "DATE-OBS",
            &first_row_time.format("%Y-%m-%dT%H:%M:%S", false),
            "observation date (UTC)",
        );

        writer.write_key_str("CTYPE2", "TIME", "in seconds");
        writer.write_key_i64("CRPIX2", 1, "");
        writer.write_key_f64("CRVAL2", first_row_time.seconds() as f64, "");
        writer.write_key_f64("CDELT2", 1.0 / self.fft_sample_rate, "");

        writer.write_key_str("CTYPE1", "FREQ", "in Hz");
        writer.write_key_i64("CRPIX1", 1, "");
        writer.write_key_f64("CRVAL1", f64::from(self.right_freq), "");
        writer.write_key_f64("CDELT1", -self.bin_width, "");

        for y in 0..length {
            writer.write_row(&data[y * width..(y + 1) * width])?;
        }
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{BatchInfo, ComplexSample, SampleSink, StreamInfo};
    use crate::waterfall::{CoreConfig, WaterfallCore};

    fn fits_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == "fits"))
            .collect();
        files.sort();
        files
    }

    fn naxis2(path: &Path) -> usize {
        let bytes = std::fs::read(path).unwrap();
        let card = bytes[..2880]
            .chunks(80)
            .map(|c| std::str::from_utf8(c).unwrap())
            .find(|c| c.starts_with("NAXIS2"))
            .unwrap();
        card[10..30].trim().parse().unwrap()
    }

    /// Full recorder lifecycle against a real core: 35 rows at 10 rows per
    /// tile makes three full tiles plus a 5-row flush on stop.
    #[test]
    fn test_tile_count_and_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let bins = 8;

        let mut core = WaterfallCore::new(CoreConfig {
            origin: "unit".into(),
            bins,
            overlap: 0,
            chunk_size: 1 << 20,
            output_dir: dir.path().to_path_buf(),
            iq_gain: 0.0,
            iq_phase_shift: 0,
        })
        .unwrap();
        core.add_recorder(Box::new(SnapshotRecorder::new(5.0, 0.0, 0.0)));

        // 16 Hz over 8-bin hops: 2 rows/s, so 5 s = 10 rows/tile (and tiles
        // far enough apart in time that their file names differ)
        core.start_stream(StreamInfo {
            sample_rate: 16,
            ..StreamInfo::default()
        });

        let samples = vec![ComplexSample::new(1.0, 0.0); bins];
        for _ in 0..35 {
            core.process(&samples, BatchInfo::default());
        }
        core.end_stream();

        let files = fits_files(dir.path());
        assert_eq!(files.len(), 4);

        let mut lengths: Vec<usize> = files.iter().map(|p| naxis2(p)).collect();
        lengths.sort_unstable();
        assert_eq!(lengths, vec![5, 10, 10, 10]);
    }

    /// A lapped reservation still produces its (possibly corrupted) tile,
    /// and the writer frees the reservation afterwards.
    #[test]
    fn test_overrun_tile_still_written() {
        struct FixedRows(usize);

        impl Recorder for FixedRows {
            fn request_buffer_size(&mut self, _params: &FftParams) -> usize {
                self.0
            }
            fn start(&mut self, _ctx: RecorderContext) -> io::Result<()> {
                Ok(())
            }
            fn update(&mut self) {}
            fn stop(&mut self) {}
        }

        let dir = tempfile::tempdir().unwrap();
        let bins = 8;

        let mut core = WaterfallCore::new(CoreConfig {
            origin: "unit".into(),
            bins,
            overlap: 0,
            // One row per chunk, so the ring holds exactly 12 rows
            chunk_size: bins * std::mem::size_of::<f32>(),
            output_dir: dir.path().to_path_buf(),
            iq_gain: 0.0,
            iq_phase_shift: 0,
        })
        .unwrap();
        core.add_recorder(Box::new(FixedRows(12)));
        core.start_stream(StreamInfo::default());

        let state = core.state();
        let samples = vec![ComplexSample::new(1.0, 0.0); bins];
        for _ in 0..12 {
            core.process(&samples, BatchInfo::default());
        }

        // Reserve the oldest rows, then let the producer lap them
        let reservation = state.lock().unwrap().ring.reserve(0, 4);
        for _ in 0..4 {
            core.process(&samples, BatchInfo::default());
        }
        assert!(state.lock().unwrap().ring.is_dirty(reservation));

        let (tx, rx) = channel::unbounded();
        let writer = TileWriter {
            state: state.clone(),
            rx,
            origin: "unit".into(),
            output_dir: dir.path().to_path_buf(),
            left_bin: 0,
            right_bin: bins,
            right_freq: 48_000.0,
            fft_sample_rate: 2.0,
            bin_width: 2.0 * 48_000.0 / bins as f64,
        };
        tx.send(Snapshot {
            start: 0,
            length: 4,
            reservation,
        });
        drop(tx);
        writer.run();

        assert_eq!(fits_files(dir.path()).len(), 1);
        // The writer already freed the reservation
        assert!(!state.lock().unwrap().ring.free_reservation(reservation));
    }

    #[test]
    fn test_no_tiles_for_empty_stream() {
        let dir = tempfile::tempdir().unwrap();

        let mut core = WaterfallCore::new(CoreConfig {
            origin: "unit".into(),
            bins: 8,
            overlap: 0,
            chunk_size: 1 << 20,
            output_dir: dir.path().to_path_buf(),
            iq_gain: 0.0,
            iq_phase_shift: 0,
        })
        .unwrap();
        core.add_recorder(Box::new(SnapshotRecorder::new(1.0, 0.0, 0.0)));

        core.start_stream(StreamInfo::default());
        core.end_stream();

        assert!(fits_files(dir.path()).is_empty());
    }

    #[test]
    fn test_file_names_carry_origin_and_utc_time() {
        let dir = tempfile::tempdir().unwrap();

        let mut core = WaterfallCore::new(CoreConfig {
            origin: "prague".into(),
            bins: 8,
            overlap: 0,
            chunk_size: 1 << 20,
            output_dir: dir.path().to_path_buf(),
            iq_gain: 0.0,
            iq_phase_shift: 0,
        })
        .unwrap();
        core.add_recorder(Box::new(SnapshotRecorder::new(0.005, 0.0, 0.0)));

        // First sample at 2013-04-26 12:00:00 UTC
        core.start_stream(StreamInfo {
            sample_rate: 16_000,
            time_offset: TimeStamp::from_seconds_micros(1_366_977_600, 0),
            ..StreamInfo::default()
        });
        let samples = vec![ComplexSample::new(1.0, 0.0); 8 * 12];
        core.process(&samples, BatchInfo::default());
        core.end_stream();

        let files = fits_files(dir.path());
        assert!(!files.is_empty());
        let name = files[0].file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "snapshot_prague_2013_04_26_12_00_00.fits");
    }
}
