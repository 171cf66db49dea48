//! Non-volatile memory and application collaborators.
//!
//! Primitives return `nb::Error::WouldBlock` while a previously issued
//! non-volatile operation is still in flight, the engine blocks on each one
//! so at most one operation is ever outstanding.

use crate::chip::Chip;

/// Self-programming access to flash (SPM)
pub trait ProgramMemory<E> {
    /// Select the upper 64K byte flash bank (RAMPZ) for the following
    /// erase / fill / write calls. Only called on extended chips.
    fn set_bank(&mut self, _high: bool) {}

    /// Erase the page containing the byte `address`
    fn erase_page(&mut self, address: u16) -> nb::Result<(), E>;

    /// Stage a little endian word into the temporary page buffer at `address`
    fn fill_word(&mut self, address: u16, word: u16) -> nb::Result<(), E>;

    /// Commit the temporary page buffer to the page containing `address`
    fn write_page(&mut self, address: u16) -> nb::Result<(), E>;

    /// Re-enable the read-while-write section once programming completes
    fn enable_rww(&mut self) -> nb::Result<(), E>;

    /// Read a byte of flash, bit 16 of `address` selects the far bank
    fn read_program(&mut self, address: u32) -> Result<u8, E>;
}

/// Byte addressed auxiliary memory
pub trait Eeprom<E> {
    fn read_eeprom(&mut self, address: u16) -> nb::Result<u8, E>;

    fn write_eeprom(&mut self, address: u16, value: u8) -> nb::Result<(), E>;
}

/// The resident application the bootloader hands over to
pub trait Application {
    /// Leave the bootloader, this never returns
    fn start(&mut self) -> !;
}

/// Per command memory selection
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Flags {
    /// Transfer targets EEPROM rather than flash
    pub eeprom: bool,
    /// Flash access lies in the upper bank (RAMPZ)
    pub high_bank: bool,
}

impl Flags {
    /// Derive flags for a transfer at word `address`
    pub fn new(chip: Chip, eeprom: bool, address: u16) -> Self {
        Self {
            eeprom,
            high_bank: chip.extended() && address > 0x7FFF,
        }
    }
}

/// Convert the address register to a byte address.
///
/// The register holds words for flash, the shifted out top bit is
/// carried by the bank select instead.
pub fn byte_address(address: u16) -> u16 {
    address << 1
}

/// Absolute flash address for `address` in the selected bank
pub fn far_address(address: u16, high_bank: bool) -> u32 {
    u32::from(address) | if high_bank { 0x1_0000 } else { 0 }
}
