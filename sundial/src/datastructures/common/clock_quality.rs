use super::ClockAccuracy;
use crate::datastructures::{WireFormat, WireFormatError};

/// A description of the accuracy and type of a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockQuality {
    pub clock_class: u8,
    pub clock_accuracy: ClockAccuracy,
    pub offset_scaled_log_variance: u16,
}

impl Default for ClockQuality {
    fn default() -> Self {
        Self {
            clock_class: 248,
            clock_accuracy: ClockAccuracy::default(),
            offset_scaled_log_variance: 0xffff,
        }
    }
}

impl WireFormat for ClockQuality {
    fn wire_size(&self) -> usize {
        4
    }

    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        buffer[0] = self.clock_class;
        buffer[1] = self.clock_accuracy.to_primitive();
        buffer[2..4].copy_from_slice(&self.offset_scaled_log_variance.to_be_bytes());
        Ok(())
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        Ok(Self {
            clock_class: buffer[0],
            clock_accuracy: buffer[1].into(),
            offset_scaled_log_variance: u16::from_be_bytes(buffer[2..4].try_into().unwrap()),
        })
    }
}
