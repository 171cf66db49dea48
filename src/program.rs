//! Write memory command.
//!
//! The whole payload is staged in the page buffer before anything is
//! written, the host clocks data faster than a page can be programmed and a
//! rejected payload must never reach flash or EEPROM.

use core::fmt::Debug;

use crate::memory::{byte_address, far_address};
use crate::protocol::{EMPTY_FRAME, FRAME_LEN};
use crate::{Application, Bootloader, Eeprom, Error, ProgramMemory, SpiPeripheral};

/// Value of unprogrammed flash
const ERASED: u8 = 0xFF;

impl<S, M, A, E> Bootloader<S, M, A, E>
where
    S: SpiPeripheral<E>,
    M: ProgramMemory<E> + Eeprom<E>,
    A: Application,
    E: Debug,
{
    pub(crate) fn write_memory(&mut self) -> Result<(), Error<E>> {
        let length = self.session.length;
        let capacity = self.options.chip.page_bytes();

        if usize::from(length) > capacity {
            return Err(Error::Oversize { length, capacity });
        }

        self.ingest()?;

        if self.session.flags.eeprom {
            self.commit_eeprom()
        } else {
            self.commit_flash()
        }
    }

    /// Receive `length` payload bytes into the page buffer
    fn ingest(&mut self) -> Result<(), Error<E>> {
        let length = self.session.length;
        let capacity = self.options.chip.page_bytes();

        self.buffer.clear();

        let mut frame = self.exchange(EMPTY_FRAME)?;
        let mut idx = 0;

        for _ in 0..length {
            if idx == FRAME_LEN {
                idx = 0;
                frame = self.exchange(EMPTY_FRAME)?;
            }
            self.buffer
                .push(frame[idx])
                .map_err(|_| Error::Oversize { length, capacity })?;
            idx += 1;
        }

        // Padding must be zero, otherwise the payload extent is unknown
        if frame[idx..].iter().any(|b| *b != 0) {
            return Err(Error::Desync);
        }

        Ok(())
    }

    fn commit_eeprom(&mut self) -> Result<(), Error<E>> {
        let mut address = byte_address(self.session.address);

        debug!("Writing {} bytes to EEPROM at 0x{:04x}", self.buffer.len(), address);

        for b in self.buffer.iter() {
            block!(self.memory.write_eeprom(address, *b)).map_err(Error::Memory)?;
            address = address.wrapping_add(1);
        }

        self.session.address = address;

        Ok(())
    }

    fn commit_flash(&mut self) -> Result<(), Error<E>> {
        let high_bank = self.session.flags.high_bank;
        let address = byte_address(self.session.address);
        let page = self.options.chip.page_bytes();

        // Flash is written in words, even up an odd number of bytes
        if self.buffer.len() % 2 != 0 {
            let capacity = page;
            let length = self.session.length;
            self.buffer
                .push(ERASED)
                .map_err(|_| Error::Oversize { length, capacity })?;
        }
        let length = self.buffer.len();

        if usize::from(address) % page + length > page {
            return Err(Error::PageOverrun { address, length });
        }

        debug!(
            "Programming {} bytes at 0x{:05x}",
            length,
            far_address(address, high_bank)
        );

        if self.options.chip.extended() {
            self.memory.set_bank(high_bank);
        }

        let memory = &mut self.memory;
        let buffer = &self.buffer;

        critical_section::with(|_| {
            block!(memory.erase_page(address))?;

            let mut fill = address;
            for w in buffer.chunks(2) {
                block!(memory.fill_word(fill, u16::from_le_bytes([w[0], w[1]])))?;
                fill = fill.wrapping_add(2);
            }

            block!(memory.write_page(address))?;
            block!(memory.enable_rww())
        })
        .map_err(Error::Memory)?;

        self.session.address = address.wrapping_add(length as u16);

        Ok(())
    }
}
