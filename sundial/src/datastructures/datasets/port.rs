use crate::config::PortConfig;
use crate::datastructures::common::{PortIdentity, TimeInterval};
use crate::datastructures::messages::VERSION_PTP;
use crate::port::state::PortState;
use crate::time::Interval;

/// How path delay is measured on a port. Only the end-to-end delay
/// request-response mechanism is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DelayMechanism {
    E2E = 0x01,
    P2P = 0x02,
    Disabled = 0xfe,
}

/// Per-port protocol parameters and the current state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDS {
    pub port_identity: PortIdentity,
    pub port_state: PortState,
    pub version_number: u8,
    pub log_announce_interval: Interval,
    pub log_sync_interval: Interval,
    pub log_min_delay_req_interval: Interval,
    pub announce_receipt_timeout: u8,
    pub peer_mean_path_delay: TimeInterval,
    pub delay_mechanism: DelayMechanism,
}

impl PortDS {
    pub fn new(config: &PortConfig, port_identity: PortIdentity) -> Self {
        PortDS {
            port_identity,
            port_state: PortState::Initializing,
            version_number: VERSION_PTP,
            log_announce_interval: config.log_announce_interval,
            log_sync_interval: config.log_sync_interval,
            log_min_delay_req_interval: config.log_min_delay_req_interval,
            announce_receipt_timeout: config.announce_receipt_timeout,
            peer_mean_path_delay: TimeInterval::ZERO,
            delay_mechanism: DelayMechanism::Disabled,
        }
    }
}
