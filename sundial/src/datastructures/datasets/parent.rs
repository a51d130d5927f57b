use super::DefaultDS;
use crate::datastructures::common::{ClockIdentity, ClockQuality, PortIdentity};

/// Who the local clock considers its parent and grandmaster. Points at the
/// clock itself while the clock is its own master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentDS {
    pub parent_port_identity: PortIdentity,
    pub grandmaster_identity: ClockIdentity,
    pub grandmaster_clock_quality: ClockQuality,
    pub grandmaster_priority_1: u8,
    pub grandmaster_priority_2: u8,
}

impl ParentDS {
    pub fn new(default_ds: &DefaultDS) -> Self {
        ParentDS {
            parent_port_identity: PortIdentity {
                clock_identity: default_ds.clock_identity,
                port_number: 0,
            },
            grandmaster_identity: default_ds.clock_identity,
            grandmaster_clock_quality: default_ds.clock_quality,
            grandmaster_priority_1: default_ds.priority_1,
            grandmaster_priority_2: default_ds.priority_2,
        }
    }

    /// Point the parent back at the local clock.
    pub(crate) fn take_from_self(&mut self, default_ds: &DefaultDS) {
        *self = Self::new(default_ds);
    }
}
