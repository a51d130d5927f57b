use crate::datastructures::{WireFormat, WireFormatError};

/// The identity of a PTP node.
///
/// All ptp clocks in a network need a unique clock identity. The identity is
/// derived from the link-layer address of the first usable network interface
/// (see [`from_mac_address`](`Self::from_mac_address`)).
///
/// Identities compare as big-endian unsigned integers, most significant byte
/// first. For more details, see *IEEE1588-2008 section 7.5.2.2*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
pub struct ClockIdentity(pub [u8; 8]);

impl ClockIdentity {
    /// Create a [`ClockIdentity`] from a mac address.
    ///
    /// Inserts `0xFF, 0xFE` between the OUI and the NIC-specific bytes,
    /// following the EUI-64 construction.
    ///
    /// # Example
    /// ```
    /// # use sundial::datastructures::common::ClockIdentity;
    /// let id = ClockIdentity::from_mac_address([0xA, 0xB, 0xC, 0xD, 0xE, 0xF]);
    /// assert_eq!(id.0, [0xA, 0xB, 0xC, 0xFF, 0xFE, 0xD, 0xE, 0xF]);
    /// ```
    pub fn from_mac_address(addr: [u8; 6]) -> Self {
        let mut this = Self([0; 8]);

        this.0[0..3].copy_from_slice(&addr[0..3]);
        this.0[3] = 0xff;
        this.0[4] = 0xfe;
        this.0[5..8].copy_from_slice(&addr[3..6]);

        this
    }
}

impl WireFormat for ClockIdentity {
    fn wire_size(&self) -> usize {
        8
    }

    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        buffer[0..8].copy_from_slice(&self.0);
        Ok(())
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        Ok(Self(buffer[0..8].try_into().unwrap()))
    }
}

impl core::fmt::Display for ClockIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, val) in self.0.iter().enumerate() {
            if i != 0 {
                write!(f, ":")?;
            }

            write!(f, "{:02x}", val)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wireformat() {
        let representations = [(
            [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08u8],
            ClockIdentity([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]),
        )];

        for (byte_representation, object_representation) in representations {
            // Test the serialization output
            let mut serialization_buffer = [0; 8];
            object_representation
                .serialize(&mut serialization_buffer)
                .unwrap();
            assert_eq!(serialization_buffer, byte_representation);

            // Test the deserialization output
            let deserialized_data = ClockIdentity::deserialize(&byte_representation).unwrap();
            assert_eq!(deserialized_data, object_representation);
        }
    }

    #[test]
    fn from_mac() {
        let mac = [1, 2, 3, 4, 5, 6];
        let id = ClockIdentity::from_mac_address(mac);
        assert_eq!(id, ClockIdentity([1, 2, 3, 0xff, 0xfe, 4, 5, 6]));
    }

    #[test]
    fn ordering_is_big_endian_unsigned() {
        let low = ClockIdentity([0, 0, 0, 0, 0, 0, 0, 0xff]);
        let high = ClockIdentity([0x80, 0, 0, 0, 0, 0, 0, 0]);
        assert!(low < high);

        // antisymmetric
        assert_eq!(low.cmp(&high), high.cmp(&low).reverse());

        // transitive
        let mid = ClockIdentity([0, 0x10, 0, 0, 0, 0, 0, 0]);
        assert!(low < mid && mid < high && low < high);
    }
}
