use core::cmp::Ordering;

use num_enum::FromPrimitive;

/// How accurate a clock claims to be, as advertised in Announce messages.
///
/// See *IEEE1588-2008 table 6* for the encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum ClockAccuracy {
    /// Accurate to within 25 ns
    NS25 = 0x20,
    /// Accurate to within 100 ns
    NS100 = 0x21,
    /// Accurate to within 250 ns
    NS250 = 0x22,
    /// Accurate to within 1 us
    US1 = 0x23,
    /// Accurate to within 2.5 us
    US2_5 = 0x24,
    /// Accurate to within 10 us
    US10 = 0x25,
    /// Accurate to within 25 us
    US25 = 0x26,
    /// Accurate to within 100 us
    US100 = 0x27,
    /// Accurate to within 250 us
    US250 = 0x28,
    /// Accurate to within 1 ms
    MS1 = 0x29,
    /// Accurate to within 2.5 ms
    MS2_5 = 0x2a,
    /// Accurate to within 10 ms
    MS10 = 0x2b,
    /// Accurate to within 25 ms
    MS25 = 0x2c,
    /// Accurate to within 100 ms
    MS100 = 0x2d,
    /// Accurate to within 250 ms
    MS250 = 0x2e,
    /// Accurate to within 1 s
    S1 = 0x2f,
    /// Accurate to within 10 s
    S10 = 0x30,
    /// Accurate to more than 10 s
    GT10S = 0x31,
    /// Accuracy is unknown
    Unknown = 0xfe,
    /// Reserved or profile-specific value
    #[num_enum(catch_all)]
    Other(u8),
}

impl Default for ClockAccuracy {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Symbol strings accepted in configuration files.
const SYMBOLS: [(&str, ClockAccuracy); 15] = [
    ("25ns", ClockAccuracy::NS25),
    ("100ns", ClockAccuracy::NS100),
    ("250ns", ClockAccuracy::NS250),
    ("1us", ClockAccuracy::US1),
    ("2,5us", ClockAccuracy::US2_5),
    ("10us", ClockAccuracy::US10),
    ("25us", ClockAccuracy::US25),
    ("100us", ClockAccuracy::US100),
    ("250us", ClockAccuracy::US250),
    ("1ms", ClockAccuracy::MS1),
    ("2,5ms", ClockAccuracy::MS2_5),
    ("10ms", ClockAccuracy::MS10),
    ("25ms", ClockAccuracy::MS25),
    ("100ms", ClockAccuracy::MS100),
    ("250ms", ClockAccuracy::MS250),
];

impl From<ClockAccuracy> for u8 {
    fn from(accuracy: ClockAccuracy) -> u8 {
        use ClockAccuracy::*;

        match accuracy {
            NS25 => 0x20,
            NS100 => 0x21,
            NS250 => 0x22,
            US1 => 0x23,
            US2_5 => 0x24,
            US10 => 0x25,
            US25 => 0x26,
            US100 => 0x27,
            US250 => 0x28,
            MS1 => 0x29,
            MS2_5 => 0x2a,
            MS10 => 0x2b,
            MS25 => 0x2c,
            MS100 => 0x2d,
            MS250 => 0x2e,
            S1 => 0x2f,
            S10 => 0x30,
            GT10S => 0x31,
            Unknown => 0xfe,
            Other(value) => value,
        }
    }
}

impl ClockAccuracy {
    pub fn to_primitive(self) -> u8 {
        self.into()
    }

    /// Compare by the numeric encoding, in which a smaller value means a
    /// more accurate clock.
    pub fn cmp_numeric(&self, other: &Self) -> Ordering {
        self.to_primitive().cmp(&other.to_primitive())
    }
}

impl core::str::FromStr for ClockAccuracy {
    type Err = UnknownSymbol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SYMBOLS
            .iter()
            .find(|(symbol, _)| *symbol == s)
            .map(|(_, accuracy)| *accuracy)
            .ok_or(UnknownSymbol)
    }
}

/// A configuration symbol did not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown symbol")]
pub struct UnknownSymbol;
