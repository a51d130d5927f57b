use num_enum::FromPrimitive;

/// What kind of source a grandmaster derives its time from.
///
/// See *IEEE1588-2008 table 7* for the encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum TimeSource {
    AtomicClock = 0x10,
    Gps = 0x20,
    TerrestrialRadio = 0x30,
    Ptp = 0x40,
    Ntp = 0x50,
    HandSet = 0x60,
    Other = 0x90,
    InternalOscillator = 0xa0,
    #[num_enum(catch_all)]
    Unknown(u8),
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::InternalOscillator
    }
}

impl From<TimeSource> for u8 {
    fn from(source: TimeSource) -> u8 {
        use TimeSource::*;

        match source {
            AtomicClock => 0x10,
            Gps => 0x20,
            TerrestrialRadio => 0x30,
            Ptp => 0x40,
            Ntp => 0x50,
            HandSet => 0x60,
            Other => 0x90,
            InternalOscillator => 0xa0,
            Unknown(value) => value,
        }
    }
}

/// Symbol strings accepted in configuration files.
const SYMBOLS: [(&str, TimeSource); 8] = [
    ("atomic clock", TimeSource::AtomicClock),
    ("gps", TimeSource::Gps),
    ("terrestrial radio", TimeSource::TerrestrialRadio),
    ("ptp", TimeSource::Ptp),
    ("ntp", TimeSource::Ntp),
    ("hand set", TimeSource::HandSet),
    ("other", TimeSource::Other),
    ("internal oscillator", TimeSource::InternalOscillator),
];

impl TimeSource {
    pub fn to_primitive(self) -> u8 {
        self.into()
    }
}

impl core::str::FromStr for TimeSource {
    type Err = super::UnknownSymbol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SYMBOLS
            .iter()
            .find(|(symbol, _)| *symbol == s)
            .map(|(_, source)| *source)
            .ok_or(super::UnknownSymbol)
    }
}
