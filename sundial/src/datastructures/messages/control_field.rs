use super::MessageType;

/// The header control field, kept for backward compatibility with PTP v1
/// hardware. Its value is fully determined by the message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum ControlField {
    Sync = 0x00,
    DelayReq = 0x01,
    FollowUp = 0x02,
    DelayResp = 0x03,
    Management = 0x04,
    Other = 0x05,
}

impl ControlField {
    pub(crate) fn to_primitive(self) -> u8 {
        self as u8
    }
}

impl From<MessageType> for ControlField {
    fn from(message_type: MessageType) -> Self {
        use MessageType::*;

        match message_type {
            Sync => ControlField::Sync,
            DelayReq => ControlField::DelayReq,
            FollowUp => ControlField::FollowUp,
            DelayResp => ControlField::DelayResp,
            Management => ControlField::Management,
            PDelayReq | PDelayResp | PDelayRespFollowUp | Announce | Signaling => {
                ControlField::Other
            }
        }
    }
}
