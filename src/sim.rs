//! Simulated hardware for running the bootloader on a host.
//!
//! [`SimPeripheral`] plays back frames from the host side of the link,
//! [`SimMemory`] models flash with a temporary page buffer and EEPROM, and
//! [`parse_script`] reads transaction scripts (one frame per line).

use std::collections::VecDeque;
use std::string::{String, ToString};
use std::vec;
use std::vec::Vec;

use embedded_hal::spi::FullDuplex;

use crate::protocol::{Frame, FRAME_LEN};
use crate::{Application, Chip, Eeprom, ProgramMemory, SpiPeripheral};

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum SimError {
    #[error("address 0x{0:05x} out of range")]
    OutOfBounds(u32),

    #[error("read while the RWW section is disabled")]
    RwwBusy,

    #[error("image of {0} bytes does not fit in flash")]
    ImageTooLarge(usize),
}

/// Host side of the SPI link
#[derive(Clone, Debug, Default)]
pub struct SimPeripheral {
    input: VecDeque<u8>,
    output: Vec<u8>,
    position: usize,
    stall_at: Option<usize>,
    collisions: Vec<usize>,
    chip_select: Vec<usize>,
    ready: bool,
    ready_count: usize,
}

impl SimPeripheral {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a peripheral preloaded with the frames of a script
    pub fn from_script(script: &[Transaction]) -> Self {
        let mut p = Self::new();
        for t in script {
            p.push_frame(t.frame);
            if t.raise_cs {
                p.raise_cs_at(p.position + p.input.len());
            }
        }
        p
    }

    /// Queue a frame to be clocked in by the host
    pub fn push_frame(&mut self, frame: Frame) {
        self.input.extend(frame.iter());
    }

    /// Host stops clocking once `byte` bytes have been exchanged
    pub fn stall_at(&mut self, byte: usize) {
        self.stall_at = Some(byte);
    }

    /// Flag a write collision on the exchange of byte index `byte`
    pub fn collide_at(&mut self, byte: usize) {
        self.collisions.push(byte);
    }

    /// Host raises chip select once `byte` bytes have been exchanged
    pub fn raise_cs_at(&mut self, byte: usize) {
        self.chip_select.push(byte);
    }

    /// Number of chip select raises the host has reached so far
    pub fn cs_raised(&self) -> usize {
        self.chip_select
            .iter()
            .filter(|b| **b <= self.position)
            .count()
    }

    /// Number of bytes exchanged so far
    pub fn exchanged(&self) -> usize {
        self.position
    }

    /// Number of queued bytes not yet clocked
    pub fn remaining(&self) -> usize {
        self.input.len()
    }

    /// Number of times the ready line was asserted
    pub fn ready_count(&self) -> usize {
        self.ready_count
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Completed frames sent by the device
    pub fn output_frames(&self) -> Vec<Frame> {
        self.output[..self.position]
            .chunks_exact(FRAME_LEN)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect()
    }
}

impl FullDuplex<u8> for SimPeripheral {
    type Error = SimError;

    fn read(&mut self) -> nb::Result<u8, SimError> {
        if self.stall_at == Some(self.position) {
            return Err(nb::Error::WouldBlock);
        }

        match self.input.pop_front() {
            Some(v) => {
                self.position += 1;
                Ok(v)
            }
            None => Err(nb::Error::WouldBlock),
        }
    }

    fn send(&mut self, word: u8) -> nb::Result<(), SimError> {
        self.output.truncate(self.position);
        self.output.push(word);
        Ok(())
    }
}

impl SpiPeripheral<SimError> for SimPeripheral {
    fn write_collision(&mut self) -> bool {
        let last = self.position.wrapping_sub(1);
        self.collisions.contains(&last)
    }

    fn set_ready(&mut self, ready: bool) -> Result<(), SimError> {
        if ready {
            self.ready_count += 1;
        }
        self.ready = ready;
        Ok(())
    }
}

/// Non-volatile operations issued against [`SimMemory`]
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum NvmOp {
    Erase(u32),
    Fill(u32, u16),
    Write(u32),
    EnableRww,
    EepromWrite(u16, u8),
}

/// Flash and EEPROM model
#[derive(Clone, Debug)]
pub struct SimMemory {
    chip: Chip,
    flash: Vec<u8>,
    eeprom: Vec<u8>,
    page: Vec<u16>,
    bank: bool,
    rww: bool,
    latency: u8,
    busy: u8,
    waits: usize,
    ops: Vec<NvmOp>,
}

impl SimMemory {
    /// Create blank (erased) memories for the provided chip
    pub fn new(chip: Chip) -> Self {
        Self {
            chip,
            flash: vec![0xFF; chip.flash_bytes()],
            eeprom: vec![0xFF; chip.eeprom_bytes()],
            page: vec![0xFFFF; usize::from(chip.page_words())],
            bank: false,
            rww: true,
            latency: 0,
            busy: 0,
            waits: 0,
            ops: Vec::new(),
        }
    }

    /// Number of polls each operation stays busy for
    pub fn with_latency(mut self, latency: u8) -> Self {
        self.latency = latency;
        self
    }

    /// Load a flash image starting at address 0
    pub fn load_flash(&mut self, image: &[u8]) -> Result<(), SimError> {
        if image.len() > self.flash.len() {
            return Err(SimError::ImageTooLarge(image.len()));
        }
        self.flash[..image.len()].copy_from_slice(image);
        Ok(())
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn eeprom(&self) -> &[u8] {
        &self.eeprom
    }

    /// Operations issued so far, in order
    pub fn ops(&self) -> &[NvmOp] {
        &self.ops
    }

    /// Number of times an operation had to wait for the previous one
    pub fn waits(&self) -> usize {
        self.waits
    }

    pub fn bank(&self) -> bool {
        self.bank
    }

    /// Gate an operation on the previous one completing
    fn start(&mut self) -> nb::Result<(), SimError> {
        if self.busy > 0 {
            self.busy -= 1;
            self.waits += 1;
            return Err(nb::Error::WouldBlock);
        }
        self.busy = self.latency;
        Ok(())
    }

    fn flash_address(&self, address: u16) -> Result<usize, SimError> {
        let abs = u32::from(address) | if self.bank { 0x1_0000 } else { 0 };
        if abs as usize >= self.flash.len() {
            return Err(SimError::OutOfBounds(abs));
        }
        Ok(abs as usize)
    }

    fn page_base(&self, abs: usize) -> usize {
        abs - abs % self.chip.page_bytes()
    }
}

impl ProgramMemory<SimError> for SimMemory {
    fn set_bank(&mut self, high: bool) {
        self.bank = high;
    }

    fn erase_page(&mut self, address: u16) -> nb::Result<(), SimError> {
        let base = self.page_base(self.flash_address(address)?);
        self.start()?;

        let page = self.chip.page_bytes();
        for b in self.flash[base..base + page].iter_mut() {
            *b = 0xFF;
        }
        self.rww = false;
        self.ops.push(NvmOp::Erase(base as u32));
        Ok(())
    }

    fn fill_word(&mut self, address: u16, word: u16) -> nb::Result<(), SimError> {
        let abs = self.flash_address(address)?;
        self.start()?;

        let index = (abs % self.chip.page_bytes()) / 2;
        self.page[index] = word;
        self.ops.push(NvmOp::Fill(abs as u32, word));
        Ok(())
    }

    fn write_page(&mut self, address: u16) -> nb::Result<(), SimError> {
        let base = self.page_base(self.flash_address(address)?);
        self.start()?;

        // Programming can only clear bits
        for (i, w) in self.page.iter().enumerate() {
            let [lo, hi] = w.to_le_bytes();
            self.flash[base + i * 2] &= lo;
            self.flash[base + i * 2 + 1] &= hi;
        }
        for w in self.page.iter_mut() {
            *w = 0xFFFF;
        }
        self.rww = false;
        self.ops.push(NvmOp::Write(base as u32));
        Ok(())
    }

    fn enable_rww(&mut self) -> nb::Result<(), SimError> {
        self.start()?;
        self.rww = true;
        self.ops.push(NvmOp::EnableRww);
        Ok(())
    }

    fn read_program(&mut self, address: u32) -> Result<u8, SimError> {
        if !self.rww {
            return Err(SimError::RwwBusy);
        }
        self.flash
            .get(address as usize)
            .copied()
            .ok_or(SimError::OutOfBounds(address))
    }
}

impl Eeprom<SimError> for SimMemory {
    fn read_eeprom(&mut self, address: u16) -> nb::Result<u8, SimError> {
        match self.eeprom.get(usize::from(address)) {
            Some(v) => Ok(*v),
            None => Err(nb::Error::Other(SimError::OutOfBounds(u32::from(address)))),
        }
    }

    fn write_eeprom(&mut self, address: u16, value: u8) -> nb::Result<(), SimError> {
        if usize::from(address) >= self.eeprom.len() {
            return Err(nb::Error::Other(SimError::OutOfBounds(u32::from(address))));
        }
        self.start()?;

        self.eeprom[usize::from(address)] = value;
        self.ops.push(NvmOp::EepromWrite(address, value));
        Ok(())
    }
}

/// Stand-in for the resident application, starting it ends the simulation
#[derive(Copy, Clone, Debug, Default)]
pub struct SimApplication;

impl Application for SimApplication {
    fn start(&mut self) -> ! {
        panic!("application started")
    }
}

/// One frame of a transaction script
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Transaction {
    /// Simulator cycle the host starts the frame on, when provided
    pub cycle: Option<u64>,
    pub frame: Frame,
    /// Host raises chip select once the frame completes
    pub raise_cs: bool,
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("line {0}: expected 5 or 6 fields, found {1}")]
    FieldCount(usize, usize),

    #[error("line {0}: invalid cycle '{1}'")]
    InvalidCycle(usize, String),

    #[error("line {0}: invalid byte '{1}'")]
    InvalidByte(usize, String),

    #[error("line {0}: invalid chip select flag '{1}'")]
    InvalidChipSelect(usize, String),
}

/// Parse a transaction script.
///
/// Each line is `[cycle] b0 b1 b2 b3 cs` with hex bytes, `#` starts a comment.
pub fn parse_script(text: &str) -> Result<Vec<Transaction>, ScriptError> {
    let mut script = Vec::new();

    for (n, line) in text.lines().enumerate() {
        let line_no = n + 1;
        let content = match line.find('#') {
            Some(i) => &line[..i],
            None => line,
        };

        let fields: Vec<&str> = content.split_whitespace().collect();
        let (cycle, rest) = match fields.len() {
            0 => continue,
            5 => (None, &fields[..]),
            6 => {
                let c = fields[0]
                    .parse::<u64>()
                    .map_err(|_| ScriptError::InvalidCycle(line_no, fields[0].to_string()))?;
                (Some(c), &fields[1..])
            }
            n => return Err(ScriptError::FieldCount(line_no, n)),
        };

        let mut frame = [0u8; FRAME_LEN];
        for (b, f) in frame.iter_mut().zip(rest[..FRAME_LEN].iter()) {
            *b = parse_byte(f).ok_or_else(|| ScriptError::InvalidByte(line_no, f.to_string()))?;
        }

        let raise_cs = match rest[FRAME_LEN] {
            "0" => false,
            "1" => true,
            f => return Err(ScriptError::InvalidChipSelect(line_no, f.to_string())),
        };

        script.push(Transaction {
            cycle,
            frame,
            raise_cs,
        });
    }

    Ok(script)
}

fn parse_byte(s: &str) -> Option<u8> {
    let decoded = match s.len() {
        1 => hex::decode(["0", s].concat()),
        2 => hex::decode(s),
        _ => return None,
    };
    decoded.ok().map(|v| v[0])
}

/// Format a frame as a script line
pub fn format_frame(frame: &Frame) -> String {
    let hex = hex::encode(frame);
    let bytes: Vec<&str> = (0..FRAME_LEN).map(|i| &hex[i * 2..i * 2 + 2]).collect();
    bytes.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_script_lines() {
        let text = "# SPI Transaction input file\n\
                    2000000 30 00 00 00 0    # hello, anyone there?\n\
                    \n\
                    75 0 0 0 1\n";
        let script = parse_script(text).unwrap();

        assert_eq!(
            script,
            vec![
                Transaction {
                    cycle: Some(2000000),
                    frame: [0x30, 0, 0, 0],
                    raise_cs: false
                },
                Transaction {
                    cycle: None,
                    frame: [0x75, 0, 0, 0],
                    raise_cs: true
                },
            ]
        );
    }

    #[test]
    fn reject_bad_lines() {
        assert_eq!(
            parse_script("30 00 00 1"),
            Err(ScriptError::FieldCount(1, 4))
        );
        assert_eq!(
            parse_script("30 00 zz 00 1"),
            Err(ScriptError::InvalidByte(1, "zz".to_string()))
        );
        assert_eq!(
            parse_script("30 00 00 00 2"),
            Err(ScriptError::InvalidChipSelect(1, "2".to_string()))
        );
        assert_eq!(
            parse_script("x 30 00 00 00 1"),
            Err(ScriptError::InvalidCycle(1, "x".to_string()))
        );
    }

    #[test]
    fn script_chip_select_tracks_exchange() {
        let script = parse_script("30 00 00 00 1\n75 00 00 00 0\n51 00 00 00 1\n").unwrap();
        let mut p = SimPeripheral::from_script(&script);
        assert_eq!(p.cs_raised(), 0);

        for _ in 0..FRAME_LEN {
            p.read().unwrap();
        }
        assert_eq!(p.cs_raised(), 1);

        for _ in 0..FRAME_LEN * 2 {
            p.read().unwrap();
        }
        assert_eq!(p.cs_raised(), 2);
        assert_eq!(p.remaining(), 0);
    }

    #[test]
    fn format_frames() {
        assert_eq!(format_frame(&[0x14, 0x30, 0x10, 0x00]), "14 30 10 00");
    }

    #[test]
    fn write_page_only_clears_bits() {
        let mut m = SimMemory::new(Chip::ATmega328P);
        m.load_flash(&[0x0F, 0xF0]).unwrap();

        m.fill_word(0, 0xFF33).unwrap();
        m.write_page(0).unwrap();
        m.enable_rww().unwrap();

        assert_eq!(&m.flash()[..2], &[0x03, 0xF0]);
        assert_eq!(m.read_program(0), Ok(0x03));
    }

    #[test]
    fn reads_blocked_until_rww_enabled() {
        let mut m = SimMemory::new(Chip::ATmega328P);
        m.erase_page(0).unwrap();
        assert_eq!(m.read_program(0), Err(SimError::RwwBusy));
        m.enable_rww().unwrap();
        assert_eq!(m.read_program(0), Ok(0xFF));
    }

    #[test]
    fn operations_wait_for_latency() {
        let mut m = SimMemory::new(Chip::ATmega328P).with_latency(2);
        m.erase_page(0).unwrap();
        assert_eq!(m.write_page(0), Err(nb::Error::WouldBlock));
        assert_eq!(m.write_page(0), Err(nb::Error::WouldBlock));
        assert_eq!(m.write_page(0), Ok(()));
        assert_eq!(m.waits(), 2);
    }

    #[test]
    fn stalled_host_never_completes() {
        let mut p = SimPeripheral::new();
        p.push_frame([1, 2, 3, 4]);
        p.stall_at(2);

        assert_eq!(p.read(), Ok(1));
        assert_eq!(p.read(), Ok(2));
        assert_eq!(p.read(), Err(nb::Error::WouldBlock));
        assert_eq!(p.remaining(), 2);
    }
}
