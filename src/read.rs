//! Read memory command.

use core::fmt::Debug;

use crate::memory::{byte_address, far_address};
use crate::protocol::{EMPTY_FRAME, FRAME_LEN};
use crate::{Application, Bootloader, Eeprom, Error, ProgramMemory, SpiPeripheral};

impl<S, M, A, E> Bootloader<S, M, A, E>
where
    S: SpiPeripheral<E>,
    M: ProgramMemory<E> + Eeprom<E>,
    A: Application,
    E: Debug,
{
    /// Stream `length` bytes to the host, the final frame is zero padded
    pub(crate) fn read_memory(&mut self) -> Result<(), Error<E>> {
        let flags = self.session.flags;
        let mut address = byte_address(self.session.address);
        let mut out = EMPTY_FRAME;
        let mut idx = 0;

        debug!(
            "Reading {} bytes of {} at 0x{:05x}",
            self.session.length,
            if flags.eeprom { "EEPROM" } else { "flash" },
            far_address(address, flags.high_bank)
        );

        for _ in 0..self.session.length {
            out[idx] = if flags.eeprom {
                block!(self.memory.read_eeprom(address)).map_err(Error::Memory)?
            } else {
                self.memory
                    .read_program(far_address(address, flags.high_bank))
                    .map_err(Error::Memory)?
            };
            address = address.wrapping_add(1);
            idx += 1;

            if idx == FRAME_LEN {
                self.exchange(out)?;
                idx = 0;
            }
        }

        if idx > 0 {
            for b in out[idx..].iter_mut() {
                *b = 0;
            }
            self.exchange(out)?;
        }

        self.session.address = address;

        Ok(())
    }
}
