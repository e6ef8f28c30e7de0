use crate::{Address, Command, Error, IoWire, OpCode};
use core::fmt::Debug;
use embedded_hal::delay::DelayNs;

/// Runs `f` with interrupts masked so a slot cannot be stretched by other activity.
#[cfg(feature = "critical-section")]
#[inline(always)]
fn interrupt_free<R>(f: impl FnOnce() -> R) -> R {
    critical_section::with(|_| f())
}

#[cfg(not(feature = "critical-section"))]
#[inline(always)]
fn interrupt_free<R>(f: impl FnOnce() -> R) -> R {
    f()
}

/// Exclusive handle on one 1-Wire line and the microsecond delay used to time it.
pub struct Driver<W: IoWire, D: DelayNs> {
    io_wire: W,
    delay: D,
    configured: bool,
    conversion_delay_ms: u32,
}

impl<E: Debug, W: IoWire<Error = E>, D: DelayNs> Driver<W, D> {
    /// Takes an already configured line and delay source. The handle must be
    /// [`init`](Driver::init)ialized before any bus operation.
    pub fn new(io_wire: W, delay: D) -> Self {
        Driver {
            io_wire,
            delay,
            configured: false,
            conversion_delay_ms: 0,
        }
    }

    /// Time to wait between starting a conversion and reading it back.
    pub fn with_conversion_delay_ms(mut self, ms: u32) -> Self {
        self.conversion_delay_ms = ms;
        self
    }

    /// Releases the line and checks that the pull-up brings it high.
    ///
    /// On failure the handle stays unconfigured and every bus operation
    /// returns [`Error::NotConfigured`] until `init` succeeds.
    pub fn init(&mut self) -> Result<(), Error<E>> {
        self.configured = false;
        self.io_wire.release()?;
        if let Err(error) = self.ensure_wire_high() {
            log::warn!("1-Wire line stays low after release: {error:?}");
            return Err(error);
        }
        self.configured = true;
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Gives back the line and the delay source.
    pub fn free(self) -> (W, D) {
        (self.io_wire, self.delay)
    }

    fn ensure_wire_high(&mut self) -> Result<(), Error<E>> {
        for _ in 0..125 {
            if self.io_wire.is_high()? {
                return Ok(());
            }
            self.delay.delay_us(2);
        }
        Err(Error::WireFault)
    }

    #[inline(always)]
    fn ensure_configured(&self) -> Result<(), Error<E>> {
        if self.configured {
            Ok(())
        } else {
            Err(Error::NotConfigured)
        }
    }

    /// Sends a reset pulse and listens for a presence pulse.
    /// Returns Err(NoPresence) if no device answered.
    pub fn reset(&mut self) -> Result<(), Error<E>> {
        if self.reset_presence()? {
            Ok(())
        } else {
            Err(Error::NoPresence)
        }
    }

    /// Sends a reset pulse: 480µs low, then samples 80µs after release.
    /// Returns whether any device pulled the line low.
    pub fn reset_presence(&mut self) -> Result<bool, Error<E>> {
        self.ensure_configured()?;
        self.io_wire.drive_low()?;
        self.delay.delay_us(480);
        let presence = interrupt_free(|| {
            self.io_wire.release()?;
            self.delay.delay_us(80);
            self.io_wire.is_low()
        })?;
        self.delay.delay_us(400);
        Ok(presence)
    }

    /// 65µs write slot: 60µs low for a zero, 5µs low for a one.
    pub fn write_bit(&mut self, high: bool) -> Result<(), Error<E>> {
        self.ensure_configured()?;
        interrupt_free(|| {
            self.io_wire.drive_low()?;
            self.delay.delay_us(if high { 5 } else { 60 });
            self.io_wire.release()
        })?;
        self.delay.delay_us(if high { 60 } else { 5 });
        Ok(())
    }

    /// 65µs read slot: 3µs low, sample 10µs after release.
    pub fn read_bit(&mut self) -> Result<bool, Error<E>> {
        self.ensure_configured()?;
        let bit = interrupt_free(|| {
            self.io_wire.drive_low()?;
            self.delay.delay_us(3);
            self.io_wire.release()?;
            self.delay.delay_us(10);
            self.io_wire.is_high()
        })?;
        self.delay.delay_us(52);
        Ok(bit)
    }

    /// Least significant bit first.
    pub fn write_byte(&mut self, byte: u8) -> Result<(), Error<E>> {
        let mut byte = byte;
        for _ in 0..8 {
            self.write_bit((byte & 0x01) == 0x01)?;
            byte >>= 1;
        }
        Ok(())
    }

    /// Least significant bit first.
    pub fn read_byte(&mut self) -> Result<u8, Error<E>> {
        let mut byte = 0_u8;
        for _ in 0..8 {
            byte >>= 1;
            if self.read_bit()? {
                byte |= 0x80;
            }
        }
        Ok(byte)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error<E>> {
        for b in bytes {
            self.write_byte(*b)?;
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<(), Error<E>> {
        for d in dst {
            *d = self.read_byte()?;
        }
        Ok(())
    }

    pub fn write_command(&mut self, cmd: impl OpCode) -> Result<(), Error<E>> {
        self.write_byte(cmd.op_code())
    }

    /// Addresses a single device: MATCH ROM followed by the ROM code, family code first.
    pub fn select(&mut self, addr: &Address) -> Result<(), Error<E>> {
        self.write_command(Command::MatchRom)?;
        self.write_bytes(addr.as_ref())
    }

    /// Addresses every device at once.
    pub fn skip(&mut self) -> Result<(), Error<E>> {
        self.write_command(Command::SkipRom)
    }

    /// Reads the ROM code of the only device on the bus.
    ///
    /// With more than one device the answers collide and the CRC check fails.
    pub fn read_rom(&mut self) -> Result<Address, Error<E>> {
        let mut raw = [0u8; Address::BYTES as usize];
        self.reset_write_read(&[Command::ReadRom.op_code()], &mut raw)?;
        let address = Address::from(raw);
        address.ensure_valid()?;
        Ok(address)
    }

    pub fn reset_write_read(&mut self, write: &[u8], read: &mut [u8]) -> Result<(), Error<E>> {
        self.reset()?;
        self.write_bytes(write)?;
        self.read_bytes(read)?;
        Ok(())
    }

    pub fn reset_select_write_read(
        &mut self,
        addr: &Address,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Error<E>> {
        self.reset()?;
        self.select(addr)?;
        self.write_bytes(write)?;
        self.read_bytes(read)?;
        Ok(())
    }

    pub fn reset_select_write_only(&mut self, addr: &Address, write: &[u8]) -> Result<(), Error<E>> {
        self.reset()?;
        self.select(addr)?;
        self.write_bytes(write)?;
        Ok(())
    }

    pub fn reset_skip_write_only(&mut self, write: &[u8]) -> Result<(), Error<E>> {
        self.reset()?;
        self.skip()?;
        self.write_bytes(write)?;
        Ok(())
    }

    /// Blocks for the configured conversion delay, if any.
    pub(crate) fn wait_for_conversion(&mut self) {
        if self.conversion_delay_ms > 0 {
            self.delay.delay_ms(self.conversion_delay_ms);
        }
    }
}
