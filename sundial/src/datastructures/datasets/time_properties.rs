use crate::datastructures::common::TimeSource;

/// Properties of the timescale currently being distributed. Refreshed from
/// the local clock when the clock becomes master, copied from the winning
/// announce message when it becomes a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePropertiesDS {
    pub current_utc_offset: u16,
    pub current_utc_offset_valid: bool,
    pub leap59: bool,
    pub leap61: bool,
    pub time_traceable: bool,
    pub frequency_traceable: bool,
    pub ptp_timescale: bool,
    pub time_source: TimeSource,
}

impl TimePropertiesDS {
    /// The properties of the free-running local clock: no UTC knowledge, not
    /// traceable to anything, but on the PTP timescale.
    pub fn local(time_source: TimeSource) -> Self {
        TimePropertiesDS {
            current_utc_offset: 0,
            current_utc_offset_valid: false,
            leap59: false,
            leap61: false,
            time_traceable: false,
            frequency_traceable: false,
            ptp_timescale: true,
            time_source,
        }
    }
}
