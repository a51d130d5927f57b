//! The slave servo: turns timestamp pairs reported by the port layer into
//! steering decisions for the local clock.

use crate::clock::Clock;
use crate::datastructures::common::TimeInterval;
use crate::datastructures::datasets::CurrentDS;
use crate::time::Timestamp;

/// Path delay samples kept in the smoothing window.
pub(crate) const NUM_PATH_DELAY: usize = 5;

/// Proportional divisor of the trim controller.
const P_DIV: i64 = 30;
/// Integral divisor of the trim controller.
const I_DIV: i64 = 1000;

/// Above this many seconds of offset the time is considered completely wrong
/// and stepped coarsely before anything else.
const GROSS_STEP_SECONDS: u64 = 1000;

/// Offsets beyond this many microseconds are stepped rather than slewed.
const OFFSET_STEP_MICROS: i64 = 10_000;

/// A proportional-integral controller disciplining the local clock to the
/// timestamps received from the elected master.
///
/// Small offsets are slewed by trimming the clock frequency; once the
/// requested trim exceeds what the adjuster tolerates, the kernel tick is
/// moved by one unit and the controller restarts. Large offsets step the
/// clock outright.
#[derive(Debug)]
pub struct PiServo {
    previous_master_timestamp: Option<Timestamp>,
    offset_integral: i64,
    path_delay: [i64; NUM_PATH_DELAY],
    path_delay_index: usize,
    /// Maximum frequency offset the adjuster accepts, in ppb. Zero when the
    /// adjuster turned out to be unusable; trimming is skipped then.
    frequency_tolerance: i64,
}

impl PiServo {
    /// Create the servo, probing the clock for its frequency tolerance.
    pub fn new(clock: &mut impl Clock) -> Self {
        let frequency_tolerance = match clock.adjust_frequency(0) {
            Ok(tolerance) => tolerance,
            Err(error) => {
                log::error!("clock adjuster is unusable: {error:?}");
                0
            }
        };

        Self {
            previous_master_timestamp: None,
            offset_integral: 0,
            path_delay: [0; NUM_PATH_DELAY],
            path_delay_index: 0,
            frequency_tolerance,
        }
    }

    /// Process a completed sync measurement: the time the master stamped on
    /// the sync and the local time at which it arrived.
    pub fn sync_received(
        &mut self,
        clock: &mut impl Clock,
        current_ds: &mut CurrentDS,
        master_time: Timestamp,
        slave_time: Timestamp,
    ) {
        let (sign, diff) = slave_time.diff(master_time);

        if diff.seconds > GROSS_STEP_SECONDS {
            // The clock is completely wrong. Step whole seconds towards the
            // master first; the next sync refines the rest.
            let now = clock.now();
            let step = Timestamp::from_secs(diff.seconds);
            let target = if sign > 0 { now - step } else { now + step };

            log::info!("large offset, stepping clock by {}s", diff.seconds);
            if let Err(error) = clock.set(target) {
                log::error!("failed to step clock: {error:?}");
            }
        } else {
            let master_to_slave_delay = sign as i64 * diff.scaled_nanos();
            let offset_from_master =
                master_to_slave_delay - current_ds.mean_path_delay.as_scaled_nanos();

            let offset_nanos = offset_from_master >> 16;
            let offset_secs = offset_nanos / 1_000_000_000;
            let offset_micros = offset_nanos / 1000 - offset_secs * 1_000_000;

            log::debug!("offset from master {offset_nanos}ns");

            if offset_secs != 0 || offset_micros.abs() > OFFSET_STEP_MICROS {
                self.step_by_offset(clock, offset_secs, offset_micros);
            } else {
                self.trim(clock, master_time, offset_nanos);
                current_ds.offset_from_master = TimeInterval::from_scaled_nanos(offset_from_master);
            }
        }

        self.previous_master_timestamp = Some(master_time);
    }

    /// Process a completed delay measurement: the local time a delay request
    /// was sent and the master time at which it arrived.
    pub fn delay_received(
        &mut self,
        current_ds: &mut CurrentDS,
        slave_time: Timestamp,
        master_time: Timestamp,
    ) {
        let (sign, diff) = master_time.diff(slave_time);

        if sign < 0 {
            log::debug!("discarding negative path delay");
            return;
        }
        if diff.seconds > GROSS_STEP_SECONDS {
            log::debug!("discarding absurdly large path delay");
            return;
        }

        self.path_delay[self.path_delay_index] = diff.scaled_nanos();
        self.path_delay_index = (self.path_delay_index + 1) % NUM_PATH_DELAY;

        let mean = self.mean_path_delay();
        current_ds.mean_path_delay = TimeInterval::from_scaled_nanos(mean);
        log::debug!("stored path delay {}ns", mean >> 16);
    }

    /// Cascaded pairwise running average over the sample window, oldest
    /// first, so that newer samples weigh geometrically more.
    fn mean_path_delay(&self) -> i64 {
        let mut index = self.path_delay_index;
        let mut mean =
            (self.path_delay[index] + self.path_delay[(index + 1) % NUM_PATH_DELAY]) / 2;
        index = (index + 1) % NUM_PATH_DELAY;

        for _ in 0..NUM_PATH_DELAY - 2 {
            mean = (mean + self.path_delay[(index + 1) % NUM_PATH_DELAY]) / 2;
            index = (index + 1) % NUM_PATH_DELAY;
        }

        mean
    }

    fn step_by_offset(&mut self, clock: &mut impl Clock, offset_secs: i64, offset_micros: i64) {
        let now = clock.now();

        let mut target = now;
        let correction_micros = offset_secs * 1_000_000 + offset_micros;
        target.add_correction(-((correction_micros * 1000) << 16));

        log::info!("stepping clock by {offset_secs}s {offset_micros}us");
        if let Err(error) = clock.set(target) {
            log::error!("failed to step clock: {error:?}");
        }
    }

    fn trim(&mut self, clock: &mut impl Clock, master_time: Timestamp, offset_nanos: i64) {
        let (Some(previous), true) = (
            self.previous_master_timestamp,
            self.frequency_tolerance != 0,
        ) else {
            log::debug!("no trim, adjuster unusable or first sample");
            return;
        };

        // Normalize the sync cadence to one measurement per second
        let (_, control_space) = master_time.diff(previous);
        let control_space_nanos = control_space.total_nanos();
        if control_space_nanos == 0 {
            return;
        }
        let space_corr = 1_000_000_000f64 / control_space_nanos as f64;

        self.offset_integral += (-((offset_nanos / I_DIV) as f64) * space_corr) as i64;
        let p_trim = (-((offset_nanos / P_DIV) as f64) * space_corr) as i64;
        let trim = p_trim + self.offset_integral;

        log::debug!(
            "trim {trim}ppb (P {p_trim}ppb, I {}ppb)",
            self.offset_integral
        );

        let result = if trim > self.frequency_tolerance {
            self.offset_integral = 0;
            clock
                .adjust_tick(1)
                .and_then(|_| clock.adjust_frequency(0).map(|_| ()))
        } else if trim < -self.frequency_tolerance {
            self.offset_integral = 0;
            clock
                .adjust_tick(-1)
                .and_then(|_| clock.adjust_frequency(0).map(|_| ()))
        } else {
            clock.adjust_frequency(trim).map(|_| ())
        };

        if let Err(error) = result {
            log::error!("clock adjustment failed: {error:?}");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A clock for tests that starts at a fixed time and records every
    /// adjustment made to it.
    #[derive(Debug)]
    pub(crate) struct TestClock {
        pub(crate) current: Timestamp,
        pub(crate) steps: Vec<Timestamp>,
        pub(crate) frequency_adjustments: Vec<i64>,
        pub(crate) tick_adjustments: Vec<i64>,
        pub(crate) tolerance: i64,
    }

    impl TestClock {
        pub(crate) fn new(current: Timestamp) -> Self {
            Self {
                current,
                steps: Vec::new(),
                frequency_adjustments: Vec::new(),
                tick_adjustments: Vec::new(),
                tolerance: 500_000,
            }
        }
    }

    impl Clock for TestClock {
        type Error = core::convert::Infallible;

        fn now(&self) -> Timestamp {
            self.current
        }

        fn set(&mut self, time: Timestamp) -> Result<(), Self::Error> {
            self.steps.push(time);
            self.current = time;
            Ok(())
        }

        fn adjust_frequency(&mut self, ppb: i64) -> Result<i64, Self::Error> {
            self.frequency_adjustments.push(ppb);
            Ok(self.tolerance)
        }

        fn adjust_tick(&mut self, delta: i64) -> Result<(), Self::Error> {
            self.tick_adjustments.push(delta);
            Ok(())
        }
    }

    fn scaled(nanos: i64) -> i64 {
        nanos << 16
    }

    #[test]
    fn constant_delay_converges_within_the_window() {
        let mut clock = TestClock::new(Timestamp::from_secs(100));
        let mut servo = PiServo::new(&mut clock);
        let mut current_ds = CurrentDS::default();

        for i in 0..NUM_PATH_DELAY as u64 {
            let slave_send = Timestamp::from_secs(10 + i);
            let master_receive = slave_send
                + Timestamp {
                    seconds: 0,
                    nanos: 1_000_000,
                    subnanos: 0,
                };
            servo.delay_received(&mut current_ds, slave_send, master_receive);
        }

        assert_eq!(current_ds.mean_path_delay.as_scaled_nanos(), scaled(1_000_000));
    }

    #[test]
    fn negative_delay_is_discarded() {
        let mut clock = TestClock::new(Timestamp::from_secs(100));
        let mut servo = PiServo::new(&mut clock);
        let mut current_ds = CurrentDS::default();

        // Master receive before slave send: impossible, ignored
        servo.delay_received(
            &mut current_ds,
            Timestamp::from_secs(10),
            Timestamp::from_secs(9),
        );
        assert_eq!(current_ds.mean_path_delay, TimeInterval::ZERO);

        // Round trip longer than the sanity bound: ignored
        servo.delay_received(
            &mut current_ds,
            Timestamp::from_secs(10),
            Timestamp::from_secs(2000),
        );
        assert_eq!(current_ds.mean_path_delay, TimeInterval::ZERO);
    }

    #[test]
    fn gross_offset_steps_whole_seconds() {
        let mut clock = TestClock::new(Timestamp::from_secs(0));
        let mut servo = PiServo::new(&mut clock);
        let mut current_ds = CurrentDS::default();

        servo.sync_received(
            &mut clock,
            &mut current_ds,
            Timestamp::from_secs(2000),
            Timestamp::from_secs(0),
        );

        // Slave is 2000 s behind: stepped forward, no trim attempted
        assert_eq!(clock.steps, vec![Timestamp::from_secs(2000)]);
        assert_eq!(servo.offset_integral, 0);
        // only the probe from PiServo::new
        assert_eq!(clock.frequency_adjustments.len(), 1);
    }

    #[test]
    fn moderate_offset_steps_by_offset() {
        let mut clock = TestClock::new(Timestamp::from_secs(50));
        let mut servo = PiServo::new(&mut clock);
        let mut current_ds = CurrentDS::default();

        // Slave 20 ms ahead of the master: beyond the 10 ms slew limit
        let master = Timestamp::from_secs(100);
        let slave = master
            + Timestamp {
                seconds: 0,
                nanos: 20_000_000,
                subnanos: 0,
            };
        servo.sync_received(&mut clock, &mut current_ds, master, slave);

        assert_eq!(clock.steps.len(), 1);
        let expected = Timestamp {
            seconds: 49,
            nanos: 980_000_000,
            subnanos: 0,
        };
        assert_eq!(clock.steps[0], expected);
    }

    #[test]
    fn small_offset_trims_frequency() {
        let mut clock = TestClock::new(Timestamp::from_secs(50));
        let mut servo = PiServo::new(&mut clock);
        let mut current_ds = CurrentDS::default();

        // First sample only records the master timestamp
        servo.sync_received(
            &mut clock,
            &mut current_ds,
            Timestamp::from_secs(100),
            Timestamp {
                seconds: 100,
                nanos: 3000,
                subnanos: 0,
            },
        );
        assert_eq!(clock.frequency_adjustments.len(), 1);

        // Second sample one second later trims
        servo.sync_received(
            &mut clock,
            &mut current_ds,
            Timestamp::from_secs(101),
            Timestamp {
                seconds: 101,
                nanos: 3000,
                subnanos: 0,
            },
        );

        assert_eq!(clock.frequency_adjustments.len(), 2);
        // 3000 ns offset: P = -(3000 / 30) = -100, I = -(3000 / 1000) = -3
        assert_eq!(clock.frequency_adjustments[1], -103);
        assert_eq!(
            current_ds.offset_from_master,
            TimeInterval::from_scaled_nanos(scaled(3000))
        );
    }

    #[test]
    fn saturated_trim_adjusts_the_tick() {
        let mut clock = TestClock::new(Timestamp::from_secs(50));
        clock.tolerance = 50;
        let mut servo = PiServo::new(&mut clock);
        let mut current_ds = CurrentDS::default();

        servo.sync_received(
            &mut clock,
            &mut current_ds,
            Timestamp::from_secs(100),
            Timestamp {
                seconds: 100,
                nanos: 9000,
                subnanos: 0,
            },
        );
        servo.sync_received(
            &mut clock,
            &mut current_ds,
            Timestamp::from_secs(101),
            Timestamp {
                seconds: 101,
                nanos: 9000,
                subnanos: 0,
            },
        );

        // Requested trim of -309 ppb exceeds the tolerance of 50: the tick
        // steps down and the integrator restarts
        assert_eq!(clock.tick_adjustments, vec![-1]);
        assert_eq!(servo.offset_integral, 0);
        assert_eq!(*clock.frequency_adjustments.last().unwrap(), 0);
    }
}
