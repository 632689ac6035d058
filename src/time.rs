//! Absolute wall-clock instants with sample-rate-aware arithmetic.
//!
//! Rows and spectra are stamped with a `TimeStamp`; snapshot tiles derive
//! their filenames and FITS headers from it.

use chrono::{DateTime, Local, TimeZone, Utc};

const US_IN_MS: i64 = 1_000;
const US_IN_SECOND: i64 = 1_000_000;

/// An absolute instant with microsecond resolution.
///
/// Stored as a single signed count of microseconds since the Unix epoch, so
/// arithmetic is a plain integer add and the seconds/microseconds split is
/// always normalized (`microseconds` in `[0, 1_000_000)` even for instants
/// before the epoch).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStamp {
    micros: i64,
}

impl TimeStamp {
    /// Current wall-clock time, microsecond resolution.
    pub fn now() -> Self {
        Self {
            micros: Utc::now().timestamp_micros(),
        }
    }

    /// Build from a seconds/microseconds pair; the pair is normalized.
    #[allow(dead_code)]
    pub fn from_seconds_micros(seconds: i64, microseconds: i64) -> Self {
        Self {
            micros: seconds * US_IN_SECOND + microseconds,
        }
    }

    pub fn seconds(&self) -> i64 {
        self.micros.div_euclid(US_IN_SECOND)
    }

    /// Sub-second part, always in `[0, 1_000_000)`.
    pub fn microseconds(&self) -> i32 {
        self.micros.rem_euclid(US_IN_SECOND) as i32
    }

    #[allow(dead_code)]
    pub fn to_milliseconds(&self) -> f64 {
        self.micros as f64 / US_IN_MS as f64
    }

    pub fn add_microseconds(&self, us: i64) -> Self {
        Self {
            micros: self.micros + us,
        }
    }

    /// Advance by the duration of `count` samples at `rate` Hz.
    ///
    /// The intermediate product is 64-bit, exact up to 2^40 samples at
    /// 48 kHz rates.
    pub fn add_samples(&self, count: i64, rate: u32) -> Self {
        self.add_microseconds(count * US_IN_SECOND / i64::from(rate))
    }

    /// Format with strftime syntax; `local = false` means UTC.
    pub fn format(&self, fmt: &str, local: bool) -> String {
        let nanos = self.microseconds() as u32 * 1_000;
        if local {
            match Local.timestamp_opt(self.seconds(), nanos) {
                chrono::LocalResult::Single(t) | chrono::LocalResult::Ambiguous(t, _) => {
                    t.format(fmt).to_string()
                }
                chrono::LocalResult::None => String::new(),
            }
        } else {
            let t: DateTime<Utc> = match Utc.timestamp_opt(self.seconds(), nanos) {
                chrono::LocalResult::Single(t) => t,
                _ => return String::new(),
            };
            t.format(fmt).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let t = TimeStamp::from_seconds_micros(10, 2_500_000);
        assert_eq!(t.seconds(), 12);
        assert_eq!(t.microseconds(), 500_000);
    }

    #[test]
    fn test_negative_micros_normalize() {
        let t = TimeStamp::from_seconds_micros(10, -1);
        assert_eq!(t.seconds(), 9);
        assert_eq!(t.microseconds(), 999_999);
    }

    #[test]
    fn test_carry_on_add() {
        let t = TimeStamp::from_seconds_micros(5, 900_000).add_microseconds(200_000);
        assert_eq!(t.seconds(), 6);
        assert_eq!(t.microseconds(), 100_000);
    }

    #[test]
    fn test_add_samples() {
        // 48000 samples at 48 kHz is exactly one second
        let t = TimeStamp::from_seconds_micros(100, 0).add_samples(48_000, 48_000);
        assert_eq!(t.seconds(), 101);
        assert_eq!(t.microseconds(), 0);

        // 8192 samples at 48 kHz: 170666.66us, floored
        let t = TimeStamp::from_seconds_micros(0, 0).add_samples(8_192, 48_000);
        assert_eq!(t.microseconds(), 170_666);
    }

    #[test]
    fn test_add_samples_large_count() {
        // 2^40 samples at 48 kHz must not overflow the 64-bit intermediate
        let t = TimeStamp::from_seconds_micros(0, 0).add_samples(1 << 40, 48_000);
        assert_eq!(t.seconds(), (1_i64 << 40) / 48_000);
    }

    #[test]
    fn test_to_milliseconds() {
        let t = TimeStamp::from_seconds_micros(1, 500_000);
        assert!((t.to_milliseconds() - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_format_utc() {
        // 2013-04-26 12:34:56 UTC
        let t = TimeStamp::from_seconds_micros(1_366_979_696, 0);
        assert_eq!(t.format("%Y-%m-%dT%H:%M:%S", false), "2013-04-26T12:34:56");
        assert_eq!(t.format("%Y_%m_%d_%H_%M_%S", false), "2013_04_26_12_34_56");
    }
}
