use core::ops::{Deref, DerefMut};

use fixed::types::I48F16;

use crate::datastructures::{WireFormat, WireFormatError};

/// A signed time interval in nanoseconds with 16 bits of fraction.
///
/// This is the 2^-16 ns scaled representation used by the correction field
/// and by the current dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct TimeInterval(pub I48F16);

impl TimeInterval {
    pub const ZERO: Self = Self(I48F16::ZERO);

    pub fn from_scaled_nanos(scaled: i64) -> Self {
        Self(I48F16::from_bits(scaled))
    }

    pub fn as_scaled_nanos(self) -> i64 {
        self.0.to_bits()
    }

    pub fn to_nanos(self) -> f64 {
        self.0.to_num()
    }
}

impl Deref for TimeInterval {
    type Target = I48F16;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for TimeInterval {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl WireFormat for TimeInterval {
    fn wire_size(&self) -> usize {
        8
    }

    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        buffer[0..8].copy_from_slice(&self.0.to_bits().to_be_bytes());
        Ok(())
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        Ok(Self(I48F16::from_bits(i64::from_be_bytes(
            buffer[0..8].try_into().unwrap(),
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wireformat() {
        let representations = [
            (
                [0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x80, 0x00u8],
                TimeInterval(I48F16::from_num(2.5f64)),
            ),
            (
                [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01u8],
                TimeInterval(I48F16::from_num(1.0f64 / u16::MAX as f64)),
            ),
            (
                [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00u8],
                TimeInterval(I48F16::from_num(-1.0f64)),
            ),
        ];

        for (byte_representation, object_representation) in representations {
            // Test the serialization output
            let mut serialization_buffer = [0; 8];
            object_representation
                .serialize(&mut serialization_buffer)
                .unwrap();
            assert_eq!(serialization_buffer, byte_representation);

            // Test the deserialization output
            let deserialized_data = TimeInterval::deserialize(&byte_representation).unwrap();
            assert_eq!(deserialized_data, object_representation);
        }
    }

    #[test]
    fn scaled_nanos_round_trip() {
        let interval = TimeInterval::from_scaled_nanos(1_000_000 << 16);
        assert_eq!(interval.to_nanos(), 1_000_000.0);
        assert_eq!(interval.as_scaled_nanos(), 1_000_000 << 16);
    }
}
