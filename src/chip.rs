//! Supported megaAVR variants.

use core::fmt;
use core::str::FromStr;

use crate::protocol::SIG_MANUFACTURER;

/// Largest page across all supported chips, in bytes
pub const MAX_PAGE_BYTES: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Chip {
    ATmega8,
    ATmega88,
    ATmega168,
    ATmega328,
    ATmega328P,
    ATmega16,
    ATmega32,
    ATmega64,
    ATmega128,
    ATmega1280,
    ATmega1281,
    ATmega162,
    ATmega163,
    ATmega169,
    ATmega8515,
    ATmega8535,
}

impl Chip {
    pub const ALL: [Chip; 16] = [
        Chip::ATmega8,
        Chip::ATmega88,
        Chip::ATmega168,
        Chip::ATmega328,
        Chip::ATmega328P,
        Chip::ATmega16,
        Chip::ATmega32,
        Chip::ATmega64,
        Chip::ATmega128,
        Chip::ATmega1280,
        Chip::ATmega1281,
        Chip::ATmega162,
        Chip::ATmega163,
        Chip::ATmega169,
        Chip::ATmega8515,
        Chip::ATmega8535,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Chip::ATmega8 => "atmega8",
            Chip::ATmega88 => "atmega88",
            Chip::ATmega168 => "atmega168",
            Chip::ATmega328 => "atmega328",
            Chip::ATmega328P => "atmega328p",
            Chip::ATmega16 => "atmega16",
            Chip::ATmega32 => "atmega32",
            Chip::ATmega64 => "atmega64",
            Chip::ATmega128 => "atmega128",
            Chip::ATmega1280 => "atmega1280",
            Chip::ATmega1281 => "atmega1281",
            Chip::ATmega162 => "atmega162",
            Chip::ATmega163 => "atmega163",
            Chip::ATmega169 => "atmega169",
            Chip::ATmega8515 => "atmega8515",
            Chip::ATmega8535 => "atmega8535",
        }
    }

    /// Device signature bytes as reported by the signature command
    pub fn signature(&self) -> [u8; 3] {
        let (sig2, sig3) = match self {
            Chip::ATmega1280 => (0x97, 0x03),
            Chip::ATmega1281 => (0x97, 0x04),
            Chip::ATmega128 => (0x97, 0x02),
            Chip::ATmega64 => (0x96, 0x02),
            Chip::ATmega32 => (0x95, 0x02),
            Chip::ATmega16 => (0x94, 0x03),
            Chip::ATmega8 => (0x93, 0x07),
            Chip::ATmega88 => (0x93, 0x0a),
            Chip::ATmega168 => (0x94, 0x06),
            Chip::ATmega328P => (0x95, 0x0F),
            Chip::ATmega328 => (0x95, 0x14),
            Chip::ATmega162 => (0x94, 0x04),
            Chip::ATmega163 => (0x94, 0x02),
            Chip::ATmega169 => (0x94, 0x05),
            Chip::ATmega8515 => (0x93, 0x06),
            Chip::ATmega8535 => (0x93, 0x08),
        };
        [SIG_MANUFACTURER, sig2, sig3]
    }

    /// Flash page size in words
    pub fn page_words(&self) -> u16 {
        match self {
            Chip::ATmega1280 | Chip::ATmega1281 | Chip::ATmega128 | Chip::ATmega64 => 0x80,
            Chip::ATmega8 | Chip::ATmega88 | Chip::ATmega8515 | Chip::ATmega8535 => 0x20,
            _ => 0x40,
        }
    }

    /// Flash page (erase unit) size in bytes
    pub fn page_bytes(&self) -> usize {
        usize::from(self.page_words()) << 1
    }

    pub fn flash_bytes(&self) -> usize {
        match self {
            Chip::ATmega128 | Chip::ATmega1280 | Chip::ATmega1281 => 128 * 1024,
            Chip::ATmega64 => 64 * 1024,
            Chip::ATmega32 | Chip::ATmega328 | Chip::ATmega328P => 32 * 1024,
            Chip::ATmega16 | Chip::ATmega168 | Chip::ATmega162 | Chip::ATmega163 | Chip::ATmega169 => {
                16 * 1024
            }
            Chip::ATmega8 | Chip::ATmega88 | Chip::ATmega8515 | Chip::ATmega8535 => 8 * 1024,
        }
    }

    pub fn eeprom_bytes(&self) -> usize {
        match self {
            Chip::ATmega128 | Chip::ATmega1280 | Chip::ATmega1281 => 4096,
            Chip::ATmega64 => 2048,
            Chip::ATmega32 | Chip::ATmega328 | Chip::ATmega328P => 1024,
            _ => 512,
        }
    }

    /// Chips with more than 64K bytes of flash, the upper half is only
    /// reachable with the bank select (RAMPZ) set.
    pub fn extended(&self) -> bool {
        matches!(self, Chip::ATmega128 | Chip::ATmega1280 | Chip::ATmega1281)
    }
}

impl Default for Chip {
    fn default() -> Self {
        Chip::ATmega328P
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct UnknownChip;

impl fmt::Display for UnknownChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown chip, expected a name such as atmega328p")
    }
}

impl FromStr for Chip {
    type Err = UnknownChip;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chip::ALL
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or(UnknownChip)
    }
}
