use crate::datastructures::{WireFormat, WireFormatError};
use crate::time::Timestamp;

/// The 10-byte timestamp carried in PTP message bodies: 48 bits of seconds
/// followed by 32 bits of nanoseconds, both in network byte order.
///
/// Fractional nanoseconds are not transmitted; decoding always yields a
/// timestamp with `subnanos == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
pub struct WireTimestamp {
    /// The seconds field of the timestamp. 48-bit, must be less than 2^48.
    pub seconds: u64,
    /// The nanoseconds field of the timestamp. Must be less than 10^9.
    pub nanos: u32,
}

impl WireFormat for WireTimestamp {
    fn wire_size(&self) -> usize {
        10
    }

    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        buffer[0..6].copy_from_slice(&self.seconds.to_be_bytes()[2..8]);
        buffer[6..10].copy_from_slice(&self.nanos.to_be_bytes());
        Ok(())
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        let mut seconds_buffer = [0; 8];
        seconds_buffer[2..8].copy_from_slice(&buffer[0..6]);

        Ok(Self {
            seconds: u64::from_be_bytes(seconds_buffer),
            nanos: u32::from_be_bytes(buffer[6..10].try_into().unwrap()),
        })
    }
}

impl From<Timestamp> for WireTimestamp {
    fn from(time: Timestamp) -> Self {
        Self {
            seconds: time.seconds & 0x0000_ffff_ffff_ffff,
            nanos: time.nanos,
        }
    }
}

impl From<WireTimestamp> for Timestamp {
    fn from(time: WireTimestamp) -> Self {
        Self {
            seconds: time.seconds,
            nanos: time.nanos,
            subnanos: 0,
        }
    }
}
