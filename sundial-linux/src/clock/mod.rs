//! Implementation of the abstract clock for the linux platform

use sundial::clock::Clock;
use sundial::time::Timestamp;

#[derive(Debug, Clone)]
pub enum Error {
    LinuxError(i32),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::LinuxError(errno) => write!(f, "os error {errno}"),
        }
    }
}

impl std::error::Error for Error {}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// The frequency field of `adjtimex` counts in 2^-16 ppm.
fn ppb_to_scaled_ppm(ppb: i64) -> i64 {
    ppb * 65536 / 1000
}

fn scaled_ppm_to_ppb(scaled: i64) -> i64 {
    scaled * 1000 / 65536
}

/// The system realtime clock, steered through `adjtimex`.
pub struct LinuxClock {
    /// Cached kernel tick length, so tick adjustments can be relative.
    tick: libc::c_long,
    tolerance: libc::c_long,
}

impl LinuxClock {
    /// Open the clock and probe the kernel for the current tick length and
    /// the frequency tolerance.
    pub fn new() -> Result<Self, Error> {
        let mut timex: libc::timex = unsafe { std::mem::zeroed() };

        if unsafe { libc::adjtimex(&mut timex) } == -1 {
            return Err(Error::LinuxError(last_errno()));
        }

        log::debug!(
            "clock opened, tick {} tolerance {}",
            timex.tick,
            timex.tolerance
        );

        Ok(Self {
            tick: timex.tick,
            tolerance: timex.tolerance,
        })
    }
}

impl Clock for LinuxClock {
    type Error = Error;

    fn now(&self) -> Timestamp {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };

        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) } == 0 {
            Timestamp {
                seconds: ts.tv_sec as u64,
                nanos: ts.tv_nsec as u32,
                subnanos: 0,
            }
        } else {
            Timestamp::default()
        }
    }

    fn set(&mut self, time: Timestamp) -> Result<(), Self::Error> {
        let ts = libc::timespec {
            tv_sec: time.seconds as libc::time_t,
            tv_nsec: time.nanos as _,
        };

        if unsafe { libc::clock_settime(libc::CLOCK_REALTIME, &ts) } == 0 {
            Ok(())
        } else {
            Err(Error::LinuxError(last_errno()))
        }
    }

    fn adjust_frequency(&mut self, ppb: i64) -> Result<i64, Self::Error> {
        let mut timex: libc::timex = unsafe { std::mem::zeroed() };
        timex.modes = libc::ADJ_FREQUENCY;
        timex.freq = ppb_to_scaled_ppm(ppb) as libc::c_long;

        if unsafe { libc::adjtimex(&mut timex) } == -1 {
            return Err(Error::LinuxError(last_errno()));
        }

        self.tick = timex.tick;
        self.tolerance = timex.tolerance;
        Ok(scaled_ppm_to_ppb(self.tolerance as i64))
    }

    fn adjust_tick(&mut self, delta: i64) -> Result<(), Self::Error> {
        let mut timex: libc::timex = unsafe { std::mem::zeroed() };
        timex.modes = libc::ADJ_TICK;
        timex.tick = self.tick + delta as libc::c_long;

        if unsafe { libc::adjtimex(&mut timex) } == -1 {
            return Err(Error::LinuxError(last_errno()));
        }

        log::debug!("kernel tick set to {}", timex.tick);
        self.tick = timex.tick;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_unit_conversions() {
        assert_eq!(ppb_to_scaled_ppm(1000), 65536);
        assert_eq!(scaled_ppm_to_ppb(65536), 1000);
        assert_eq!(scaled_ppm_to_ppb(ppb_to_scaled_ppm(500_000)), 500_000);
        assert_eq!(ppb_to_scaled_ppm(-1000), -65536);
    }
}
