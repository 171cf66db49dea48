//! SPI Bootloader for megaAVR.
//!
//! Peripheral mode bootloader speaking a fixed 4 byte frame protocol,
//! see [`protocol`] for the command set. Hardware access is provided by
//! the [`SpiPeripheral`], [`ProgramMemory`], [`Eeprom`] and [`Application`]
//! traits so the engine runs unchanged against the [`sim`] models.

#![cfg_attr(not(any(feature = "std", feature = "structopt")), no_std)]

use core::convert::TryFrom;
use core::fmt::Debug;
use core::marker::PhantomData;

#[cfg(all(test, not(any(feature = "std", feature = "structopt"))))]
extern crate std;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

pub mod chip;
pub mod memory;
pub mod protocol;
pub mod transport;

mod program;
mod read;

#[cfg(feature = "std")]
pub mod sim;


pub use chip::Chip;
pub use memory::{Application, Eeprom, Flags, ProgramMemory};
pub use transport::SpiPeripheral;

use chip::MAX_PAGE_BYTES;
use protocol::{Command, Frame, EMPTY_FRAME};

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<E: Debug> {
    #[error("timeout waiting for the host to clock a byte")]
    Timeout,

    #[error("too many write collisions")]
    Collision,

    #[error("non-zero padding after write payload")]
    Desync,

    #[error("write of {length} bytes exceeds the {capacity} byte page buffer")]
    Oversize { length: u16, capacity: usize },

    #[error("write of {length} bytes at 0x{address:04x} crosses a page boundary")]
    PageOverrun { address: u16, length: usize },

    #[error("peripheral error: {0:?}")]
    Peripheral(E),

    #[error("memory error: {0:?}")]
    Memory(E),
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Target chip, selects signature and page size
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "atmega328p"))]
    pub chip: Chip,

    /// Busy-wait iterations allowed per frame before starting the application
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "500000"))]
    pub max_wait_cycles: u32,

    /// Write collisions tolerated before starting the application
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "5"))]
    pub max_errors: u8,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            chip: Chip::default(),
            // F_CPU >> 4 at 8MHz
            max_wait_cycles: 500_000,
            max_errors: 5,
        }
    }
}

/// Registers persisting between frames
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct Session {
    /// Current address, words for flash and (pre-shift) EEPROM
    pub address: u16,
    /// Length of the current transfer in bytes
    pub length: u16,
    pub flags: Flags,
    /// Write collisions seen so far
    pub errors: u8,
}

/// Outcome of a single dispatch
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Status {
    Continue,
    Leave,
}

pub struct Bootloader<S, M, A, E> {
    options: Options,
    session: Session,
    buffer: heapless::Vec<u8, MAX_PAGE_BYTES>,
    port: S,
    memory: M,
    app: A,
    _err: PhantomData<E>,
}

impl<S, M, A, E> Bootloader<S, M, A, E>
where
    S: SpiPeripheral<E>,
    M: ProgramMemory<E> + Eeprom<E>,
    A: Application,
    E: Debug,
{
    /// Create a new bootloader instance
    pub fn new(port: S, memory: M, app: A, options: Options) -> Self {
        Self {
            options,
            session: Session::default(),
            buffer: heapless::Vec::new(),
            port,
            memory,
            app,
            _err: PhantomData,
        }
    }

    /// Fetch the session registers
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn port(&self) -> &S {
        &self.port
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Tear down the bootloader, returning the peripherals
    pub fn release(self) -> (S, M, A) {
        (self.port, self.memory, self.app)
    }

    /// Execute the bootloader, only ever leaves by starting the application
    pub fn run(mut self) -> ! {
        info!("Bootloader started ({})", self.options.chip);

        loop {
            match self.poll() {
                Ok(Status::Continue) => (),
                Ok(Status::Leave) => {
                    info!("Leaving programming mode");
                    self.app.start()
                }
                Err(e) => {
                    error!("Bootloader error: {}", e);
                    self.app.start()
                }
            }
        }
    }

    /// Receive and handle one command frame
    pub fn poll(&mut self) -> Result<Status, Error<E>> {
        let frame = self.exchange(EMPTY_FRAME)?;
        self.dispatch(frame)
    }

    pub(crate) fn dispatch(&mut self, frame: Frame) -> Result<Status, Error<E>> {
        let command = match Command::try_from(frame[0]) {
            Ok(c) => c,
            Err(op) => {
                debug!("Ignoring opcode 0x{:02x}", op);
                return Ok(Status::Continue);
            }
        };

        debug!("Received command: {:?}", command);

        match command {
            Command::Ping => self.respond(protocol::ack(Command::Ping as u8))?,
            Command::Leave => {
                self.respond(protocol::ack(0))?;
                return Ok(Status::Leave);
            }
            Command::SetAddress => {
                self.session.address = protocol::address(&frame);
                self.respond(protocol::ack(0))?;
            }
            Command::WriteMemory => {
                self.begin_transfer(&frame);
                self.write_memory()?;
                self.respond(protocol::ack(0))?;
            }
            Command::ReadMemory => {
                self.begin_transfer(&frame);
                self.read_memory()?;
            }
            Command::ReadSignature => {
                let sig = protocol::signature(self.options.chip.signature());
                self.respond(sig)?;
            }
        }

        Ok(Status::Continue)
    }

    fn begin_transfer(&mut self, frame: &Frame) {
        self.session.length = protocol::length(frame);
        self.session.flags = Flags::new(
            self.options.chip,
            protocol::is_eeprom(frame),
            self.session.address,
        );
    }

    fn respond(&mut self, frame: Frame) -> Result<(), Error<E>> {
        self.exchange(frame).map(|_| ())
    }
}
