//! Frame protocol definitions.
//!
//! Every exchange on the link is a fixed 4 byte frame. The host initiates
//! each frame, so any response from the device is clocked out by the
//! frame the host sends next.

use core::convert::TryFrom;

/// Number of bytes in a frame
pub const FRAME_LEN: usize = 4;

/// A single frame as exchanged on the link
pub type Frame = [u8; FRAME_LEN];

/// Frame clocked out while the device has nothing to say
pub const EMPTY_FRAME: Frame = [0; FRAME_LEN];

/// Leading byte of an acknowledgement frame
pub const RESP_INSYNC: u8 = 0x14;

/// Trailing marker byte of an acknowledgement frame
pub const RESP_OK: u8 = 0x10;

/// Memory select byte marking a transfer against auxiliary (EEPROM) memory
pub const MEM_EEPROM: u8 = b'E';

/// Manufacturer byte shared by every supported device signature
pub const SIG_MANUFACTURER: u8 = 0x1E;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Command {
    /// Check the bootloader is listening, responds with an ack carrying `'0'`
    Ping = b'0' as isize,

    /// Leave programming mode and start the resident application
    Leave = b'Q' as isize,

    /// Set the current address, little endian. EEPROM in bytes, flash in words.
    SetAddress = b'U' as isize,

    /// Write a block of up to one page to flash or EEPROM, length is big endian
    WriteMemory = b'd' as isize,

    /// Read a block from flash or EEPROM, length is big endian
    ReadMemory = b't' as isize,

    /// Fetch the three device signature bytes
    ReadSignature = b'u' as isize,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            b'0' => Ok(Command::Ping),
            b'Q' => Ok(Command::Leave),
            b'U' => Ok(Command::SetAddress),
            b'd' => Ok(Command::WriteMemory),
            b't' => Ok(Command::ReadMemory),
            b'u' => Ok(Command::ReadSignature),
            _ => Err(v),
        }
    }
}

/// Build an acknowledgement frame carrying `value`
pub const fn ack(value: u8) -> Frame {
    [RESP_INSYNC, value, RESP_OK, 0x00]
}

/// Build the identity frame for the provided signature
pub const fn signature(sig: [u8; 3]) -> Frame {
    [Command::ReadSignature as u8, sig[0], sig[1], sig[2]]
}

/// Address carried by a set address frame (bytes 1..=2, little endian)
pub fn address(frame: &Frame) -> u16 {
    u16::from_le_bytes([frame[1], frame[2]])
}

/// Transfer length carried by a read / write frame (bytes 1..=2, big endian)
pub fn length(frame: &Frame) -> u16 {
    u16::from_be_bytes([frame[1], frame[2]])
}

/// Whether a read / write frame selects EEPROM (byte 3)
pub fn is_eeprom(frame: &Frame) -> bool {
    frame[3] == MEM_EEPROM
}
