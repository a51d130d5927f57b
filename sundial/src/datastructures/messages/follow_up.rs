use crate::datastructures::{common::WireTimestamp, WireFormat, WireFormatError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FollowUpMessage {
    pub(crate) precise_origin_timestamp: WireTimestamp,
}

impl FollowUpMessage {
    pub(crate) fn content_size(&self) -> usize {
        10
    }

    pub(crate) fn serialize_content(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < 10 {
            return Err(WireFormatError::BufferTooShort);
        }
        self.precise_origin_timestamp.serialize(&mut buffer[0..10])?;

        Ok(())
    }

    pub(crate) fn deserialize_content(buffer: &[u8]) -> Result<Self, WireFormatError> {
        if buffer.len() < 10 {
            return Err(WireFormatError::BufferTooShort);
        }
        Ok(Self {
            precise_origin_timestamp: WireTimestamp::deserialize(&buffer[0..10])?,
        })
    }
}
