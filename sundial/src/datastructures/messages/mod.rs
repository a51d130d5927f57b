//! Ptp network messages

pub(crate) use announce::*;
pub(crate) use delay_req::*;
pub(crate) use delay_resp::*;
pub(crate) use follow_up::*;
pub(crate) use header::*;
pub(crate) use sync::*;

use super::{
    common::TimeInterval,
    datasets::{DefaultDS, PortDS},
    WireFormatError,
};
use crate::{ptp_instance::PtpInstanceState, time::Timestamp};

mod announce;
mod control_field;
mod delay_req;
mod delay_resp;
mod follow_up;
mod header;
mod sync;

pub(crate) use control_field::ControlField;

/// Maximum length of a packet
///
/// This can be used to preallocate buffers that can always fit packets sent
/// and received by `sundial`.
pub const MAX_DATA_LEN: usize = 255;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    num_enum::TryFromPrimitive,
    num_enum::IntoPrimitive,
)]
#[repr(u8)]
pub enum MessageType {
    Sync = 0x0,
    DelayReq = 0x1,
    PDelayReq = 0x2,
    PDelayResp = 0x3,
    FollowUp = 0x8,
    DelayResp = 0x9,
    PDelayRespFollowUp = 0xa,
    Announce = 0xb,
    Signaling = 0xc,
    Management = 0xd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Message {
    pub(crate) header: Header,
    pub(crate) body: MessageBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageBody {
    Sync(SyncMessage),
    DelayReq(DelayReqMessage),
    FollowUp(FollowUpMessage),
    DelayResp(DelayRespMessage),
    Announce(AnnounceMessage),
    /// A recognized message kind that this implementation does not act on
    /// (peer delay, signaling, management).
    Ignored(MessageType),
}

impl MessageBody {
    fn wire_size(&self) -> usize {
        match &self {
            MessageBody::Sync(m) => m.content_size(),
            MessageBody::DelayReq(m) => m.content_size(),
            MessageBody::FollowUp(m) => m.content_size(),
            MessageBody::DelayResp(m) => m.content_size(),
            MessageBody::Announce(m) => m.content_size(),
            MessageBody::Ignored(_) => 0,
        }
    }

    pub(crate) fn content_type(&self) -> MessageType {
        match self {
            MessageBody::Sync(_) => MessageType::Sync,
            MessageBody::DelayReq(_) => MessageType::DelayReq,
            MessageBody::FollowUp(_) => MessageType::FollowUp,
            MessageBody::DelayResp(_) => MessageType::DelayResp,
            MessageBody::Announce(_) => MessageType::Announce,
            MessageBody::Ignored(message_type) => *message_type,
        }
    }

    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        match &self {
            MessageBody::Sync(m) => m.serialize_content(buffer)?,
            MessageBody::DelayReq(m) => m.serialize_content(buffer)?,
            MessageBody::FollowUp(m) => m.serialize_content(buffer)?,
            MessageBody::DelayResp(m) => m.serialize_content(buffer)?,
            MessageBody::Announce(m) => m.serialize_content(buffer)?,
            MessageBody::Ignored(_) => return Err(WireFormatError::Invalid),
        }

        Ok(())
    }

    fn deserialize(
        message_type: MessageType,
        header: &Header,
        buffer: &[u8],
    ) -> Result<Self, WireFormatError> {
        let body = match message_type {
            MessageType::Sync => MessageBody::Sync(SyncMessage::deserialize_content(buffer)?),
            MessageType::DelayReq => {
                MessageBody::DelayReq(DelayReqMessage::deserialize_content(buffer)?)
            }
            MessageType::FollowUp => {
                MessageBody::FollowUp(FollowUpMessage::deserialize_content(buffer)?)
            }
            MessageType::DelayResp => {
                MessageBody::DelayResp(DelayRespMessage::deserialize_content(buffer)?)
            }
            MessageType::Announce => {
                MessageBody::Announce(AnnounceMessage::deserialize_content(*header, buffer)?)
            }
            other => MessageBody::Ignored(other),
        };

        Ok(body)
    }
}

fn base_header(default_ds: &DefaultDS, port_ds: &PortDS, sequence_id: u16) -> Header {
    Header {
        domain_number: default_ds.domain_number,
        source_port_identity: port_ds.port_identity,
        sequence_id,
        ..Default::default()
    }
}

impl Message {
    pub(crate) fn sync(
        global: &PtpInstanceState,
        port_ds: &PortDS,
        unicast: bool,
        sequence_id: u16,
        origin_timestamp: Timestamp,
    ) -> Self {
        let header = Header {
            two_step_flag: global.default_ds.two_step,
            unicast_flag: unicast,
            log_message_interval: port_ds.log_sync_interval.as_log_2(),
            ..base_header(&global.default_ds, port_ds, sequence_id)
        };

        Message {
            header,
            body: MessageBody::Sync(SyncMessage {
                origin_timestamp: origin_timestamp.into(),
            }),
        }
    }

    pub(crate) fn follow_up(
        global: &PtpInstanceState,
        port_ds: &PortDS,
        unicast: bool,
        sequence_id: u16,
        sync_send_time: Timestamp,
    ) -> Self {
        let header = Header {
            two_step_flag: true,
            unicast_flag: unicast,
            log_message_interval: port_ds.log_sync_interval.as_log_2(),
            ..base_header(&global.default_ds, port_ds, sequence_id)
        };

        Message {
            header,
            body: MessageBody::FollowUp(FollowUpMessage {
                precise_origin_timestamp: sync_send_time.into(),
            }),
        }
    }

    /// Build an announce message. With `local` set the grandmaster fields
    /// describe the local clock itself (the D0 form used during master
    /// selection); otherwise they come from the parent dataset.
    pub(crate) fn announce(
        global: &PtpInstanceState,
        port_ds: &PortDS,
        unicast: bool,
        sequence_id: u16,
        origin_timestamp: Timestamp,
        local: bool,
    ) -> Self {
        let time_properties_ds = &global.time_properties_ds;

        let header = Header {
            unicast_flag: unicast,
            leap61: time_properties_ds.leap61,
            leap59: time_properties_ds.leap59,
            current_utc_offset_valid: time_properties_ds.current_utc_offset_valid,
            ptp_timescale: time_properties_ds.ptp_timescale,
            time_traceable: time_properties_ds.time_traceable,
            frequency_traceable: time_properties_ds.frequency_traceable,
            log_message_interval: port_ds.log_announce_interval.as_log_2(),
            ..base_header(&global.default_ds, port_ds, sequence_id)
        };

        let body = if local {
            AnnounceMessage {
                header,
                origin_timestamp: origin_timestamp.into(),
                current_utc_offset: time_properties_ds.current_utc_offset,
                grandmaster_priority_1: global.default_ds.priority_1,
                grandmaster_clock_quality: global.default_ds.clock_quality,
                grandmaster_priority_2: global.default_ds.priority_2,
                grandmaster_identity: global.default_ds.clock_identity,
                steps_removed: global.current_ds.steps_removed.min(u16::MAX as u32) as u16,
                time_source: time_properties_ds.time_source,
            }
        } else {
            AnnounceMessage {
                header,
                origin_timestamp: origin_timestamp.into(),
                current_utc_offset: time_properties_ds.current_utc_offset,
                grandmaster_priority_1: global.parent_ds.grandmaster_priority_1,
                grandmaster_clock_quality: global.parent_ds.grandmaster_clock_quality,
                grandmaster_priority_2: global.parent_ds.grandmaster_priority_2,
                grandmaster_identity: global.parent_ds.grandmaster_identity,
                steps_removed: global.current_ds.steps_removed.min(u16::MAX as u32) as u16,
                time_source: time_properties_ds.time_source,
            }
        };

        Message {
            header,
            body: MessageBody::Announce(body),
        }
    }

    /// Build a delay request. The asymmetry correction (2^-16 ns units) is
    /// removed up front by carrying its negation in the correction field.
    pub(crate) fn delay_req(
        global: &PtpInstanceState,
        port_ds: &PortDS,
        unicast: bool,
        sequence_id: u16,
        asymmetry_correction: i64,
        origin_timestamp: Timestamp,
    ) -> Self {
        let header = Header {
            unicast_flag: unicast,
            correction_field: TimeInterval::from_scaled_nanos(-asymmetry_correction),
            log_message_interval: 0x7f,
            ..base_header(&global.default_ds, port_ds, sequence_id)
        };

        Message {
            header,
            body: MessageBody::DelayReq(DelayReqMessage {
                origin_timestamp: origin_timestamp.into(),
            }),
        }
    }

    /// Build the response to a delay request, echoing its sequence id and
    /// correction field back to the requester.
    pub(crate) fn delay_resp(
        global: &PtpInstanceState,
        port_ds: &PortDS,
        unicast: bool,
        receive_timestamp: Timestamp,
        request_header: &Header,
    ) -> Self {
        let header = Header {
            unicast_flag: unicast,
            correction_field: request_header.correction_field,
            log_message_interval: port_ds.log_min_delay_req_interval.as_log_2(),
            ..base_header(&global.default_ds, port_ds, request_header.sequence_id)
        };

        Message {
            header,
            body: MessageBody::DelayResp(DelayRespMessage {
                receive_timestamp: receive_timestamp.into(),
                requesting_port_identity: request_header.source_port_identity,
            }),
        }
    }
}

impl Message {
    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    /// Whether this message goes out through the event port (319) rather
    /// than the general port (320).
    pub(crate) fn is_event(&self) -> bool {
        use MessageBody::*;
        match self.body {
            Sync(_) | DelayReq(_) => true,
            FollowUp(_) | DelayResp(_) | Announce(_) | Ignored(_) => false,
        }
    }

    /// The byte size on the wire of this message
    pub(crate) fn wire_size(&self) -> usize {
        self.header.wire_size() + self.body.wire_size()
    }

    /// Serializes the message into the PTP wire format.
    ///
    /// Returns the used buffer size that contains the message or an error.
    pub(crate) fn serialize(&self, buffer: &mut [u8]) -> Result<usize, WireFormatError> {
        if buffer.len() < self.wire_size() {
            return Err(WireFormatError::BufferTooShort);
        }

        let (header, body) = buffer.split_at_mut(34);

        self.header
            .serialize_header(self.body.content_type(), self.body.wire_size(), header)?;
        self.body.serialize(body)?;

        Ok(self.wire_size())
    }

    /// Deserializes a message from the PTP wire format.
    ///
    /// Returns the message or an error.
    pub(crate) fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        let header_data = Header::deserialize_header(buffer)?;

        if header_data.message_length < 34 {
            return Err(WireFormatError::Invalid);
        }

        // Ensure we have the entire message and ignore potential padding
        // Skip the header bytes and only keep the content
        let content_buffer = buffer
            .get(34..(header_data.message_length as usize))
            .ok_or(WireFormatError::BufferTooShort)?;

        let body = MessageBody::deserialize(
            header_data.message_type,
            &header_data.header,
            content_buffer,
        )?;

        Ok(Message {
            header: header_data.header,
            body,
        })
    }
}
