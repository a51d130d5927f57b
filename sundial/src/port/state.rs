/// The protocol state of a port, see *IEEE1588-2008 section 9.2.5*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortState {
    #[default]
    Initializing,
    Faulty,
    Disabled,
    Listening,
    PreMaster,
    Master,
    Passive,
    Uncalibrated,
    Slave,
}

impl PortState {
    /// Whether the port takes part in the best master selection. Faulty and
    /// disabled ports contribute no foreign masters and get no decisions.
    pub(crate) fn selects_master(&self) -> bool {
        !matches!(self, PortState::Disabled | PortState::Faulty)
    }

    /// Whether messages are processed at all in this state.
    pub(crate) fn receives_messages(&self) -> bool {
        !matches!(
            self,
            PortState::Initializing | PortState::Disabled | PortState::Faulty
        )
    }
}

impl core::fmt::Display for PortState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            PortState::Initializing => "INITIALIZING",
            PortState::Faulty => "FAULTY",
            PortState::Disabled => "DISABLED",
            PortState::Listening => "LISTENING",
            PortState::PreMaster => "PRE_MASTER",
            PortState::Master => "MASTER",
            PortState::Passive => "PASSIVE",
            PortState::Uncalibrated => "UNCALIBRATED",
            PortState::Slave => "SLAVE",
        };
        f.write_str(name)
    }
}
