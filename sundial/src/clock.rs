//! Definitions of the abstract clock adjuster

use crate::time::Timestamp;

/// Clock manipulation and querying interface
///
/// The clock trait is the primary way the PTP stack interfaces with the
/// system clock. Its implementation should be provided by the user of the
/// sundial crate; an implementation for Linux on top of `adjtimex` lives in
/// the sundial-linux crate.
pub trait Clock {
    /// Type of the error the methods of this [`Clock`] may return
    type Error: core::fmt::Debug;

    /// Get the current time of the clock
    fn now(&self) -> Timestamp;

    /// Step the clock to an absolute time
    fn set(&mut self, time: Timestamp) -> Result<(), Self::Error>;

    /// Set the frequency offset of the clock in parts per billion, returning
    /// the maximum offset the clock will accept (also in ppb).
    ///
    /// Requesting an offset beyond that tolerance is clamped by the
    /// implementation; callers that need a bigger slew should adjust the
    /// tick instead.
    fn adjust_frequency(&mut self, ppb: i64) -> Result<i64, Self::Error>;

    /// Permanently speed up or slow down the clock by adjusting the length
    /// of the kernel tick by `delta` units.
    fn adjust_tick(&mut self, delta: i64) -> Result<(), Self::Error>;
}

impl<T: Clock + ?Sized> Clock for Box<T> {
    type Error = T::Error;

    fn now(&self) -> Timestamp {
        self.as_ref().now()
    }

    fn set(&mut self, time: Timestamp) -> Result<(), Self::Error> {
        self.as_mut().set(time)
    }

    fn adjust_frequency(&mut self, ppb: i64) -> Result<i64, Self::Error> {
        self.as_mut().adjust_frequency(ppb)
    }

    fn adjust_tick(&mut self, delta: i64) -> Result<(), Self::Error> {
        self.as_mut().adjust_tick(delta)
    }
}
