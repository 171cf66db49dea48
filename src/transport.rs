//! Frame transport over the SPI peripheral.

use core::fmt::Debug;

use embedded_hal::spi::FullDuplex;

use crate::protocol::{Frame, EMPTY_FRAME};
use crate::{Application, Bootloader, Eeprom, Error, ProgramMemory};

/// SPI peripheral running in peripheral (slave) mode.
///
/// `send` loads the byte shifted out on the next host clock, `read` completes
/// once the host has clocked a full byte.
pub trait SpiPeripheral<E>: FullDuplex<u8, Error = E> {
    /// Fetch and clear the write collision flag (WCOL)
    fn write_collision(&mut self) -> bool;

    /// Drive the ready line, asserted while a frame is waiting to be clocked
    fn set_ready(&mut self, _ready: bool) -> Result<(), E> {
        Ok(())
    }
}

impl<S, M, A, E> Bootloader<S, M, A, E>
where
    S: SpiPeripheral<E>,
    M: ProgramMemory<E> + Eeprom<E>,
    A: Application,
    E: Debug,
{
    /// Exchange a single frame with the host, returning the received bytes
    pub(crate) fn exchange(&mut self, out: Frame) -> Result<Frame, Error<E>> {
        let mut frame = EMPTY_FRAME;
        let mut count = 0u32;

        self.port.set_ready(true).map_err(Error::Peripheral)?;

        for (i, b) in out.iter().enumerate() {
            loop {
                match self.port.send(*b) {
                    Ok(()) => break,
                    Err(nb::Error::Other(e)) => return Err(Error::Peripheral(e)),
                    Err(nb::Error::WouldBlock) => (),
                }
                self.tick(&mut count)?;
            }

            frame[i] = loop {
                match self.port.read() {
                    Ok(v) => break v,
                    Err(nb::Error::Other(e)) => return Err(Error::Peripheral(e)),
                    Err(nb::Error::WouldBlock) => (),
                }
                self.tick(&mut count)?;
            };

            if self.port.write_collision() {
                let seen = self.session.errors;
                self.session.errors = seen.saturating_add(1);
                warn!("Write collision ({} total)", u16::from(seen) + 1);

                if seen >= self.options.max_errors {
                    return Err(Error::Collision);
                }
            }
        }

        trace!("Frame out: {:02x?} in: {:02x?}", out, frame);

        Ok(frame)
    }

    /// Count one idle poll against the frame budget, dropping the ready line
    /// once the host has been kept waiting
    fn tick(&mut self, count: &mut u32) -> Result<(), Error<E>> {
        *count += 1;
        if *count == 1 {
            self.port.set_ready(false).map_err(Error::Peripheral)?;
        }
        if *count > self.options.max_wait_cycles {
            return Err(Error::Timeout);
        }
        Ok(())
    }
}
