use byteorder::{ByteOrder, LittleEndian};
use embedded_hal::delay::DelayNs;

use crate::{compute_crc8, Address, Driver, Error, IoWire, OpCode};
use core::fmt::Debug;

#[derive(Clone, Copy, Debug)]
#[repr(u8)]
pub enum Command {
    Convert = 0x44,
    WriteScratchpad = 0x4E,
    ReadScratchpad = 0xBE,
    CopyScratchpad = 0x48,
    RecallE2 = 0xB8,
    ReadPowerSupply = 0xB4,
}

impl OpCode for Command {
    fn op_code(&self) -> u8 {
        *self as _
    }
}

/// Temperature sensor families sharing the DS18B20 command set
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Family {
    /// DS18S20 or the older DS1820, 9 bit register with the binary point after bit 1
    Ds18s20,
    Ds1822,
    Ds18b20,
}

impl Family {
    pub fn detect(family_code: u8) -> Option<Family> {
        match family_code {
            0x10 => Some(Family::Ds18s20),
            0x22 => Some(Family::Ds1822),
            0x28 => Some(Family::Ds18b20),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum MeasureResolution {
    TC8 = 0b0001_1111,
    TC4 = 0b0011_1111,
    TC2 = 0b0101_1111,
    TC = 0b0111_1111,
}

impl MeasureResolution {
    pub fn time_ms(&self) -> u16 {
        match self {
            MeasureResolution::TC8 => 94,
            MeasureResolution::TC4 => 188,
            MeasureResolution::TC2 => 375,
            MeasureResolution::TC => 750,
        }
    }
}

/// Whole degrees from the two temperature register bytes, in the order they are sent.
///
/// The four fractional bits are dropped with an arithmetic shift, so negative
/// readings round toward minus infinity.
pub fn decode_temperature(low: u8, high: u8) -> i16 {
    LittleEndian::read_i16(&[low, high]) >> 4
}

/// One sensor on the bus, identified by a ROM code with a valid CRC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ds18b20 {
    address: Address,
}

impl From<Ds18b20> for Address {
    fn from(device: Ds18b20) -> Self {
        device.address
    }
}

impl Ds18b20 {
    pub const FAMILY_CODE: u8 = 0x28;

    pub fn new<E: Debug>(address: Address) -> Result<Self, Error<E>> {
        address.ensure_valid()?;
        Ok(Self { address })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn family(&self) -> Option<Family> {
        Family::detect(self.address.family_code())
    }

    /// Starts a conversion on this sensor only.
    pub fn measure_temperature<W: IoWire, D: DelayNs>(
        &self,
        driver: &mut Driver<W, D>,
    ) -> Result<(), Error<W::Error>> {
        driver.reset_select_write_only(&self.address, &[Command::Convert.op_code()])
    }

    /// Starts a conversion on every sensor at once.
    pub fn measure_temperature_all<W: IoWire, D: DelayNs>(
        driver: &mut Driver<W, D>,
    ) -> Result<(), Error<W::Error>> {
        driver.reset_skip_write_only(&[Command::Convert.op_code()])
    }

    /// Converts and reads back in one addressed session, in whole degrees.
    ///
    /// Only the two temperature bytes of the scratchpad are read, so no CRC
    /// protects the value.
    pub fn read_temperature<W: IoWire, D: DelayNs>(
        &self,
        driver: &mut Driver<W, D>,
    ) -> Result<i16, Error<W::Error>> {
        if self.family() != Some(Family::Ds18b20) {
            log::warn!(
                "{} has family code {:#04x}, decoding it as a DS18B20 register",
                self.address,
                self.address.family_code()
            );
        }
        self.measure_temperature(driver)?;
        driver.wait_for_conversion();
        let mut raw = [0u8; 2];
        driver.reset_select_write_read(
            &self.address,
            &[Command::ReadScratchpad.op_code()],
            &mut raw,
        )?;
        let temperature = decode_temperature(raw[0], raw[1]);
        log::debug!("{} reads {} degrees", self.address, temperature);
        Ok(temperature)
    }

    /// Reads all nine scratchpad bytes and checks their CRC.
    pub fn read_scratchpad<W: IoWire, D: DelayNs>(
        &self,
        driver: &mut Driver<W, D>,
    ) -> Result<[u8; 9], Error<W::Error>> {
        let mut scratchpad = [0u8; 9];
        driver.reset_select_write_read(
            &self.address,
            &[Command::ReadScratchpad.op_code()],
            &mut scratchpad,
        )?;
        let computed = compute_crc8(&scratchpad[..8]);
        if computed != scratchpad[8] {
            return Err(Error::CrcMismatch(computed, scratchpad[8]));
        }
        Ok(scratchpad)
    }

    /// Sets the alarm thresholds and the conversion resolution.
    pub fn write_scratchpad<W: IoWire, D: DelayNs>(
        &self,
        driver: &mut Driver<W, D>,
        high_alarm: i8,
        low_alarm: i8,
        resolution: MeasureResolution,
    ) -> Result<(), Error<W::Error>> {
        driver.reset_select_write_only(
            &self.address,
            &[
                Command::WriteScratchpad.op_code(),
                high_alarm as u8,
                low_alarm as u8,
                resolution as u8,
            ],
        )
    }

    /// Stores the alarm thresholds and resolution in EEPROM.
    ///
    /// The copy takes up to 10ms, during which a parasite-powered sensor needs
    /// the line held high.
    pub fn copy_scratchpad<W: IoWire, D: DelayNs>(
        &self,
        driver: &mut Driver<W, D>,
    ) -> Result<(), Error<W::Error>> {
        driver.reset_select_write_only(&self.address, &[Command::CopyScratchpad.op_code()])
    }

    /// Reloads the alarm thresholds and resolution from EEPROM into the scratchpad.
    pub fn recall_eeprom<W: IoWire, D: DelayNs>(
        &self,
        driver: &mut Driver<W, D>,
    ) -> Result<(), Error<W::Error>> {
        driver.reset_select_write_only(&self.address, &[Command::RecallE2.op_code()])
    }

    /// Returns true when the sensor draws its power from the data line.
    pub fn is_parasite_powered<W: IoWire, D: DelayNs>(
        &self,
        driver: &mut Driver<W, D>,
    ) -> Result<bool, Error<W::Error>> {
        driver.reset_select_write_only(&self.address, &[Command::ReadPowerSupply.op_code()])?;
        Ok(!driver.read_bit()?)
    }
}

impl<E: Debug, W: IoWire<Error = E>, D: DelayNs> Driver<W, D> {
    /// Reads every sensor listed in `addresses` into the matching slot of `temperatures`.
    ///
    /// Stops at the first [`Address::SENTINEL`] or at the end of either slice.
    /// Sensors that fail their CRC or do not answer get `None`. Returns the
    /// number of temperatures read.
    pub fn read_temperatures(
        &mut self,
        addresses: &[Address],
        temperatures: &mut [Option<i16>],
    ) -> Result<usize, Error<E>> {
        let mut count = 0;
        let entries = addresses
            .iter()
            .take_while(|address| !address.is_sentinel())
            .zip(temperatures.iter_mut());
        for (address, slot) in entries {
            *slot = None;
            let sensor = match Ds18b20::new::<E>(*address) {
                Ok(sensor) => sensor,
                Err(_) => {
                    log::warn!("refusing to address {address}: bad CRC");
                    continue;
                }
            };
            match sensor.read_temperature(self) {
                Ok(temperature) => {
                    *slot = Some(temperature);
                    count += 1;
                }
                Err(Error::NoPresence) => log::warn!("{address} did not answer"),
                Err(error) => return Err(error),
            }
        }
        Ok(count)
    }
}
