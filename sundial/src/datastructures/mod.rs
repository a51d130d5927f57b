//! General datastructures as defined by the ptp spec

use core::fmt::Debug;

pub mod common;
pub mod datasets;
pub mod messages;

#[derive(Clone, Debug, thiserror::Error)]
pub enum WireFormatError {
    #[error("enum conversion failed")]
    EnumConversionError,
    #[error("buffer too short")]
    BufferTooShort,
    #[error("invalid frame")]
    Invalid,
}

impl<Enum: num_enum::TryFromPrimitive> From<num_enum::TryFromPrimitiveError<Enum>>
    for WireFormatError
{
    fn from(_: num_enum::TryFromPrimitiveError<Enum>) -> Self {
        Self::EnumConversionError
    }
}

trait WireFormat: Debug + Clone + Eq {
    /// The byte size on the wire of this object
    fn wire_size(&self) -> usize;

    /// Serializes the object into the PTP wire format.
    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError>;

    /// Deserializes the object from the PTP wire format.
    fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError>;
}
