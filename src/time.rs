//! Precision timestamps and sample-offset arithmetic
//!
//! A [`PrecisionTime`] splits a J1970 UTC time into whole and fractional
//! seconds so that adding many small sample offsets does not lose precision
//! the way a single `f64` would. All arithmetic normalizes the result so that
//! `twsec` holds no fraction and `0.0 <= tfsec < 1.0`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Time code mode: no time source
pub const TCM_OFF: i16 = 0;
/// Time code mode: host CPU clock
pub const TCM_CPU: i16 = 1;
/// Time code status: timestamp is not valid
pub const TCS_INVALID: i16 = 0;
/// Time code status: timestamp is valid
pub const TCS_VALID: i16 = 1;

/// Timestamp attached to each packet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrecisionTime {
    /// Time code mode
    pub tcmode: i16,
    /// Time code status
    pub tcstatus: i16,
    /// Fractional sample offset
    pub toff: f64,
    /// Whole seconds since the J1970 epoch
    pub twsec: f64,
    /// Fractional seconds, 0.0 to 1.0
    pub tfsec: f64,
}

impl Default for PrecisionTime {
    fn default() -> Self {
        Self::not_set()
    }
}

impl PrecisionTime {
    /// Create a valid CPU timestamp from whole and fractional seconds
    pub fn new(twsec: f64, tfsec: f64) -> Self {
        let mut time = Self {
            tcmode: TCM_CPU,
            tcstatus: TCS_VALID,
            toff: 0.0,
            twsec,
            tfsec,
        };
        time.normalize();
        time
    }

    /// Create a valid timestamp from a floating-point seconds value
    pub fn from_secs_f64(seconds: f64) -> Self {
        let whole = seconds.floor();
        Self::new(whole, seconds - whole)
    }

    /// Current time of day reported by the system clock
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Timestamp for a chrono UTC datetime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self::new(
            dt.timestamp() as f64,
            f64::from(dt.timestamp_subsec_nanos()) * 1e-9,
        )
    }

    /// A timestamp explicitly marked as "not set"
    pub fn not_set() -> Self {
        Self {
            tcmode: TCM_OFF,
            tcstatus: TCS_INVALID,
            toff: 0.0,
            twsec: 0.0,
            tfsec: 0.0,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.tcstatus == TCS_VALID
    }

    /// Total seconds as a single `f64` (loses sub-microsecond precision for
    /// present-day times)
    pub fn as_secs_f64(&self) -> f64 {
        self.twsec + self.tfsec
    }

    /// Move any fraction out of `twsec` and any whole seconds out of `tfsec`
    pub fn normalize(&mut self) {
        let fadj = self.twsec - self.twsec.floor();
        self.twsec -= fadj;
        self.tfsec += fadj;

        let wadj = self.tfsec.floor();
        self.twsec += wadj;
        self.tfsec -= wadj;

        // Rounding on tiny negative fractions can land exactly on 1.0
        if self.tfsec >= 1.0 {
            self.twsec += 1.0;
            self.tfsec -= 1.0;
        }
    }

    /// New timestamp advanced by `samples * xdelta` seconds
    pub fn add_sample_offset(&self, samples: usize, xdelta: f64) -> Self {
        *self + samples as f64 * xdelta
    }

    /// Convert to a chrono datetime, if representable
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let nanos = (self.tfsec * 1e9).round() as u32;
        DateTime::from_timestamp(self.twsec as i64, nanos.min(999_999_999))
    }
}

impl AddAssign<f64> for PrecisionTime {
    fn add_assign(&mut self, offset: f64) {
        let whole = offset.trunc();
        self.twsec += whole;
        self.tfsec += offset - whole;
        self.normalize();
    }
}

impl Add<f64> for PrecisionTime {
    type Output = PrecisionTime;

    fn add(mut self, offset: f64) -> PrecisionTime {
        self += offset;
        self
    }
}

impl SubAssign<f64> for PrecisionTime {
    fn sub_assign(&mut self, offset: f64) {
        *self += -offset;
    }
}

impl Sub<f64> for PrecisionTime {
    type Output = PrecisionTime;

    fn sub(mut self, offset: f64) -> PrecisionTime {
        self -= offset;
        self
    }
}

/// Difference in seconds
impl Sub<PrecisionTime> for PrecisionTime {
    type Output = f64;

    fn sub(self, other: PrecisionTime) -> f64 {
        (self.twsec - other.twsec) + (self.tfsec - other.tfsec)
    }
}

impl PartialOrd for PrecisionTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.twsec.partial_cmp(&other.twsec)? {
            Ordering::Equal => self.tfsec.partial_cmp(&other.tfsec),
            ord => Some(ord),
        }
    }
}

impl fmt::Display for PrecisionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::from_timestamp(self.twsec as i64, 0) {
            Some(dt) => {
                let micros = (self.tfsec * 1e6).floor() as u32;
                write!(f, "{}.{:06}", dt.format("%Y:%m:%d::%H:%M:%S"), micros.min(999_999))
            }
            None => write!(f, "{}+{}", self.twsec, self.tfsec),
        }
    }
}

/// Field-by-field timestamp equality
pub fn default_comparator(a: &PrecisionTime, b: &PrecisionTime) -> bool {
    a.tcmode == b.tcmode
        && a.tcstatus == b.tcstatus
        && a.toff == b.toff
        && a.twsec == b.twsec
        && a.tfsec == b.tfsec
}
