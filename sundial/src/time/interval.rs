use super::{Timestamp, NANOS_PER_SECOND};

/// A log2 representation of seconds used to describe the pacing of events in
/// PTP
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Interval(i8);

impl core::fmt::Debug for Interval {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Interval")
            .field("seconds", &self.seconds())
            .field("log_base_2", &self.0)
            .finish()
    }
}

impl Interval {
    /// An Interval of one second
    pub const ONE_SECOND: Self = Self(0);

    /// An Interval of two seconds
    pub const TWO_SECONDS: Self = Self(1);

    /// Construct an [`Interval`] from log2 seconds.
    pub const fn from_log_2(log_2: i8) -> Self {
        Self(log_2)
    }

    /// Get the log2 of the number of seconds of this [`Interval`]
    pub const fn as_log_2(self) -> i8 {
        self.0
    }

    /// Turn `self` into a number of seconds as [`f64`]
    ///
    /// # Example
    /// ```
    /// # use sundial::time::Interval;
    /// assert_eq!(Interval::from_log_2(1).seconds(), 2.0);
    /// assert_eq!(Interval::from_log_2(-1).seconds(), 0.5);
    /// ```
    pub fn seconds(self) -> f64 {
        if self.0 >= 0 {
            (1u64 << (self.0 as u32).min(62)) as f64
        } else {
            1.0 / (1u64 << (-(self.0 as i32) as u32).min(62)) as f64
        }
    }

    /// The length of the interval as a [`Timestamp`].
    ///
    /// Sub-second intervals divide a second by a power of two; intervals
    /// shorter than 2^-9 s lose precision below a nanosecond.
    ///
    /// # Example
    /// ```
    /// # use sundial::time::{Interval, Timestamp};
    /// assert_eq!(Interval::from_log_2(3).as_timestamp(), Timestamp::from_secs(8));
    /// assert_eq!(
    ///     Interval::from_log_2(-2).as_timestamp(),
    ///     Timestamp { seconds: 0, nanos: 250_000_000, subnanos: 0 }
    /// );
    /// ```
    pub fn as_timestamp(self) -> Timestamp {
        if self.0 >= 0 {
            Timestamp::from_secs(1u64 << (self.0 as u32).min(62))
        } else {
            let shift = (-(self.0 as i32) as u32).min(31);
            Timestamp {
                seconds: 0,
                nanos: NANOS_PER_SECOND >> shift,
                subnanos: 0,
            }
        }
    }

    /// The length of the interval in whole microseconds.
    pub fn as_micros(self) -> u64 {
        let t = self.as_timestamp();
        t.seconds * 1_000_000 + t.nanos as u64 / 1000
    }
}

impl From<i8> for Interval {
    fn from(value: i8) -> Self {
        Self::from_log_2(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two() {
        assert_eq!(Interval::TWO_SECONDS.seconds(), 2.0f64)
    }

    #[test]
    fn micros() {
        assert_eq!(Interval::from_log_2(0).as_micros(), 1_000_000);
        assert_eq!(Interval::from_log_2(3).as_micros(), 8_000_000);
        assert_eq!(Interval::from_log_2(-1).as_micros(), 500_000);
    }
}
