use crate::config::InstanceConfig;
use crate::datastructures::common::{ClockIdentity, ClockQuality};

/// Static description of the local clock, initialized from the configuration
/// and the identity of the first port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDS {
    pub two_step: bool,
    pub clock_identity: ClockIdentity,
    pub num_ports: u32,
    pub clock_quality: ClockQuality,
    pub priority_1: u8,
    pub priority_2: u8,
    pub domain_number: u8,
    pub slave_only: bool,
}

impl DefaultDS {
    pub fn new(config: &InstanceConfig, clock_identity: ClockIdentity) -> Self {
        // A slave-only clock must never win the master selection.
        let clock_class = if config.slave_only {
            255
        } else {
            config.clock_class
        };

        DefaultDS {
            two_step: !config.one_step_clock,
            clock_identity,
            num_ports: 0,
            clock_quality: ClockQuality {
                clock_class,
                clock_accuracy: config.clock_accuracy,
                offset_scaled_log_variance: 0xffff,
            },
            priority_1: config.priority_1,
            priority_2: config.priority_2,
            domain_number: config.domain_number,
            slave_only: config.slave_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slave_only_forces_clock_class() {
        let config = InstanceConfig {
            clock_class: 6,
            slave_only: true,
            ..Default::default()
        };
        let ds = DefaultDS::new(&config, ClockIdentity::default());
        assert_eq!(ds.clock_quality.clock_class, 255);
    }
}
