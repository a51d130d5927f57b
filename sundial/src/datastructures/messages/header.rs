use super::{ControlField, MessageType};
use crate::datastructures::{
    common::{PortIdentity, TimeInterval},
    WireFormat, WireFormatError,
};

/// The PTP version implemented here.
pub(crate) const VERSION_PTP: u8 = 2;

const FLAG_ALTERNATE_MASTER: u16 = 0x0001;
const FLAG_TWO_STEP: u16 = 0x0002;
const FLAG_UNICAST: u16 = 0x0004;
const FLAG_LEAP_61: u16 = 0x0100;
const FLAG_LEAP_59: u16 = 0x0200;
const FLAG_UTC_OFFSET_VALID: u16 = 0x0400;
const FLAG_PTP_TIMESCALE: u16 = 0x0800;
const FLAG_TIME_TRACEABLE: u16 = 0x1000;
const FLAG_FREQUENCY_TRACEABLE: u16 = 0x2000;

/// The common header at the start of every PTP message.
///
/// The message type, length, and control field are not stored here; they are
/// derived from the message body at serialization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Header {
    pub(crate) domain_number: u8,
    pub(crate) alternate_master_flag: bool,
    pub(crate) two_step_flag: bool,
    pub(crate) unicast_flag: bool,
    pub(crate) leap61: bool,
    pub(crate) leap59: bool,
    pub(crate) current_utc_offset_valid: bool,
    pub(crate) ptp_timescale: bool,
    pub(crate) time_traceable: bool,
    pub(crate) frequency_traceable: bool,
    pub(crate) correction_field: TimeInterval,
    pub(crate) source_port_identity: PortIdentity,
    pub(crate) sequence_id: u16,
    pub(crate) log_message_interval: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeserializedHeader {
    pub(crate) header: Header,
    pub(crate) message_type: MessageType,
    pub(crate) message_length: u16,
}

impl Header {
    pub(crate) const fn wire_size(&self) -> usize {
        34
    }

    pub(crate) fn serialize_header(
        &self,
        content_type: MessageType,
        content_length: usize,
        buffer: &mut [u8],
    ) -> Result<(), WireFormatError> {
        if buffer.len() < 34 {
            return Err(WireFormatError::BufferTooShort);
        }

        buffer[0] = u8::from(content_type) & 0x0f;
        buffer[1] = VERSION_PTP;
        buffer[2..4].copy_from_slice(&((34 + content_length) as u16).to_be_bytes());
        buffer[4] = self.domain_number;
        buffer[5] = 0;

        let mut flags = 0u16;
        if self.alternate_master_flag {
            flags |= FLAG_ALTERNATE_MASTER;
        }
        if self.two_step_flag {
            flags |= FLAG_TWO_STEP;
        }
        if self.unicast_flag {
            flags |= FLAG_UNICAST;
        }
        if self.leap61 {
            flags |= FLAG_LEAP_61;
        }
        if self.leap59 {
            flags |= FLAG_LEAP_59;
        }
        if self.current_utc_offset_valid {
            flags |= FLAG_UTC_OFFSET_VALID;
        }
        if self.ptp_timescale {
            flags |= FLAG_PTP_TIMESCALE;
        }
        if self.time_traceable {
            flags |= FLAG_TIME_TRACEABLE;
        }
        if self.frequency_traceable {
            flags |= FLAG_FREQUENCY_TRACEABLE;
        }
        buffer[6..8].copy_from_slice(&flags.to_be_bytes());

        self.correction_field.serialize(&mut buffer[8..16])?;
        buffer[16..20].fill(0);
        self.source_port_identity.serialize(&mut buffer[20..30])?;
        buffer[30..32].copy_from_slice(&self.sequence_id.to_be_bytes());
        buffer[32] = ControlField::from(content_type).to_primitive();
        buffer[33] = self.log_message_interval as u8;

        Ok(())
    }

    pub(crate) fn deserialize_header(buffer: &[u8]) -> Result<DeserializedHeader, WireFormatError> {
        if buffer.len() < 34 {
            return Err(WireFormatError::BufferTooShort);
        }

        if buffer[1] & 0x0f != VERSION_PTP {
            return Err(WireFormatError::Invalid);
        }

        let message_type = MessageType::try_from(buffer[0] & 0x0f)?;
        let message_length = u16::from_be_bytes(buffer[2..4].try_into().unwrap());
        let flags = u16::from_be_bytes(buffer[6..8].try_into().unwrap());

        Ok(DeserializedHeader {
            header: Header {
                domain_number: buffer[4],
                alternate_master_flag: flags & FLAG_ALTERNATE_MASTER != 0,
                two_step_flag: flags & FLAG_TWO_STEP != 0,
                unicast_flag: flags & FLAG_UNICAST != 0,
                leap61: flags & FLAG_LEAP_61 != 0,
                leap59: flags & FLAG_LEAP_59 != 0,
                current_utc_offset_valid: flags & FLAG_UTC_OFFSET_VALID != 0,
                ptp_timescale: flags & FLAG_PTP_TIMESCALE != 0,
                time_traceable: flags & FLAG_TIME_TRACEABLE != 0,
                frequency_traceable: flags & FLAG_FREQUENCY_TRACEABLE != 0,
                correction_field: TimeInterval::deserialize(&buffer[8..16])?,
                source_port_identity: PortIdentity::deserialize(&buffer[20..30])?,
                sequence_id: u16::from_be_bytes(buffer[30..32].try_into().unwrap()),
                log_message_interval: buffer[33] as i8,
            },
            message_type,
            message_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastructures::common::ClockIdentity;
    use fixed::types::I48F16;

    #[test]
    fn wireformat() {
        let byte_representation = [
            0x09, 0x02, 0x00, 0x36, 0x01, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
            0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
            0x00, 0x09, 0x05, 0x39, 0x03, 0x7f,
        ];

        let header = Header {
            domain_number: 1,
            two_step_flag: true,
            unicast_flag: true,
            correction_field: TimeInterval(I48F16::from_num(1.5f64)),
            source_port_identity: PortIdentity {
                clock_identity: ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
                port_number: 9,
            },
            sequence_id: 0x0539,
            log_message_interval: 0x7f,
            ..Default::default()
        };

        let mut buffer = [0; 34];
        header
            .serialize_header(MessageType::DelayResp, 20, &mut buffer)
            .unwrap();
        assert_eq!(buffer, byte_representation);

        let deserialized = Header::deserialize_header(&byte_representation).unwrap();
        assert_eq!(deserialized.header, header);
        assert_eq!(deserialized.message_type, MessageType::DelayResp);
        assert_eq!(deserialized.message_length, 54);
    }

    #[test]
    fn rejects_wrong_version() {
        let mut buffer = [0u8; 34];
        buffer[0] = 0x0b;
        buffer[1] = 0x01;
        assert!(matches!(
            Header::deserialize_header(&buffer),
            Err(WireFormatError::Invalid)
        ));
    }

    #[test]
    fn traceability_flags_are_distinct_bits() {
        let header = Header {
            time_traceable: true,
            ..Default::default()
        };
        let mut time_only = [0; 34];
        header
            .serialize_header(MessageType::Announce, 30, &mut time_only)
            .unwrap();

        let header = Header {
            frequency_traceable: true,
            ..Default::default()
        };
        let mut freq_only = [0; 34];
        header
            .serialize_header(MessageType::Announce, 30, &mut freq_only)
            .unwrap();

        assert_eq!(u16::from_be_bytes([time_only[6], time_only[7]]), 0x1000);
        assert_eq!(u16::from_be_bytes([freq_only[6], freq_only[7]]), 0x2000);
    }
}
