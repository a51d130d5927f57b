//! The logical configuration records the protocol engine consumes.
//!
//! How these records are produced (config file format, CLI flags) is up to
//! the embedder; the sundial-linux daemon reads them from a TOML file.

use crate::datastructures::common::{ClockAccuracy, ClockIdentity, TimeSource};
use crate::time::Interval;

/// Clock-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    pub clock_class: u8,
    pub clock_accuracy: ClockAccuracy,
    pub priority_1: u8,
    pub priority_2: u8,
    pub domain_number: u8,
    pub slave_only: bool,
    /// Whether sync messages carry their own send timestamp instead of
    /// being followed by a follow-up message.
    pub one_step_clock: bool,
    /// What the local clock claims to derive its time from when it is the
    /// grandmaster.
    pub time_source: TimeSource,
    /// Paces the master selection when no port supplies a nearer deadline.
    pub log_announce_interval: Interval,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            clock_class: 248,
            clock_accuracy: ClockAccuracy::Unknown,
            priority_1: 128,
            priority_2: 128,
            domain_number: 0,
            slave_only: false,
            one_step_clock: false,
            time_source: TimeSource::InternalOscillator,
            log_announce_interval: Interval::TWO_SECONDS,
        }
    }
}

/// Per-port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    pub log_announce_interval: Interval,
    pub log_sync_interval: Interval,
    pub log_min_delay_req_interval: Interval,
    /// How many announce intervals without traffic from the elected master
    /// before the port gives up on it.
    pub announce_receipt_timeout: u8,
    /// Known asymmetry of the network path, in picoseconds. Positive when
    /// the master-to-slave direction is longer.
    pub delay_asymmetry: i64,
    /// When set, the asymmetry is only applied while synchronized to this
    /// specific master.
    pub delay_asymmetry_master: Option<ClockIdentity>,
    /// Whether this port sends to configured unicast addresses rather than
    /// the multicast group.
    pub unicast: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            log_announce_interval: Interval::TWO_SECONDS,
            log_sync_interval: Interval::ONE_SECOND,
            log_min_delay_req_interval: Interval::ONE_SECOND,
            announce_receipt_timeout: 4,
            delay_asymmetry: 0,
            delay_asymmetry_master: None,
            unicast: false,
        }
    }
}

impl PortConfig {
    /// The configured asymmetry in the 2^-16 ns units of the correction
    /// field.
    pub(crate) fn scaled_delay_asymmetry(&self) -> i64 {
        (self.delay_asymmetry << 16) / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asymmetry_scales_picoseconds_to_subnanos() {
        let config = PortConfig {
            delay_asymmetry: 2_500,
            ..Default::default()
        };
        // 2500 ps = 2.5 ns = 2.5 * 2^16 in scaled units
        assert_eq!(config.scaled_delay_asymmetry(), (5 << 16) / 2);
    }
}
