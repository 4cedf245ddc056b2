use serde::{Deserialize, Serialize};
use std::fmt;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Time stamp in nanoseconds. `Time::ZERO` marks static quantities
/// (tag poses on a body, camera extrinsics).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Time(u64);

impl Time {
    pub const ZERO: Time = Time(0);

    pub fn from_nsec(nsec: u64) -> Time {
        Time(nsec)
    }

    pub fn new(sec: u32, nsec: u32) -> Time {
        Time(sec as u64 * NSEC_PER_SEC + nsec as u64)
    }

    pub fn from_sec(sec: f64) -> Time {
        Time((sec * NSEC_PER_SEC as f64).round() as u64)
    }

    pub fn to_nsec(&self) -> u64 {
        self.0
    }

    pub fn to_sec(&self) -> f64 {
        self.0 as f64 / NSEC_PER_SEC as f64
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.0 / NSEC_PER_SEC, self.0 % NSEC_PER_SEC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sec_nsec_correct() {
        let t = Time::new(12, 5);
        assert_eq!(12_000_000_005, t.to_nsec());
        assert_eq!("12.000000005", t.to_string());
        assert_eq!(Time::from_sec(1.5), Time::new(1, 500_000_000));
        approx::assert_abs_diff_eq!(1.5, Time::from_sec(1.5).to_sec(), epsilon = 1e-12);
    }
}
