use crate::{Address, Command, Driver, Error, IoWire};
use core::fmt::Debug;
use embedded_hal::delay::DelayNs;

/// State carried from one search round to the next.
///
/// Start every enumeration from [`DeviceSearch::new`] and pass the same value
/// to each round.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceSearch {
    address: Address,
    last_branch: Option<u8>,
    done: bool,
}

impl DeviceSearch {
    pub fn new() -> DeviceSearch {
        DeviceSearch::default()
    }

    /// Address found by the last successful round
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Highest bit position where the last round took the zero branch
    pub fn last_branch(&self) -> Option<u8> {
        self.last_branch
    }

    /// No branches are left to explore
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bit to follow at a branch point during the next round
    fn branch(&self, bit: u8) -> bool {
        match self.last_branch {
            Some(last) if bit == last => true,
            Some(last) if bit < last => self.address.bit(bit),
            _ => false,
        }
    }

    pub fn into_iter<'a, W: IoWire, D: DelayNs>(
        self,
        driver: &'a mut Driver<W, D>,
    ) -> DeviceSearchIter<'a, W, D> {
        DeviceSearchIter {
            search: Some(self),
            driver,
        }
    }
}

pub struct DeviceSearchIter<'a, W: IoWire, D: DelayNs> {
    search: Option<DeviceSearch>,
    driver: &'a mut Driver<W, D>,
}

impl<W: IoWire, D: DelayNs> Iterator for DeviceSearchIter<'_, W, D> {
    type Item = Result<Address, Error<W::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut search = self.search.take()?;
        let result = self.driver.search_next(&mut search).transpose()?;
        if result.is_ok() {
            self.search = Some(search);
        }
        Some(result)
    }
}

/// Outcome of [`Driver::discover`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Discovery {
    /// Valid addresses written to the buffer
    pub found: usize,
    /// ROM codes dropped for a CRC mismatch or for being all zero
    pub rejected: usize,
    /// The buffer filled up before the search finished
    pub truncated: bool,
}

impl<E: Debug, W: IoWire<Error = E>, D: DelayNs> Driver<W, D> {
    pub fn search_next(&mut self, search: &mut DeviceSearch) -> Result<Option<Address>, Error<E>> {
        self.search(search, Command::SearchRom)
    }

    /// Like [`search_next`](Driver::search_next) but only devices with an active alarm answer.
    pub fn search_next_alarmed(
        &mut self,
        search: &mut DeviceSearch,
    ) -> Result<Option<Address>, Error<E>> {
        self.search(search, Command::AlarmSearch)
    }

    /// One reset and search cycle over the 64 ROM bits.
    ///
    /// Returns `Ok(None)` once the previous round found the last device or when
    /// nothing answers the reset. A failed round leaves `search` untouched.
    pub(crate) fn search(
        &mut self,
        search: &mut DeviceSearch,
        cmd: Command,
    ) -> Result<Option<Address>, Error<E>> {
        if search.done || !self.reset_presence()? {
            return Ok(None);
        }

        self.write_command(cmd)?;

        let mut address = search.address;
        let mut last_zero = None;
        for bit in 0..Address::BITS {
            let bit0 = self.read_bit()?; // normal bit
            let bit1 = self.read_bit()?; // complementary bit

            let value = match (bit0, bit1) {
                (true, true) => return Err(Error::BusFault(bit)),
                (false, false) => {
                    let value = search.branch(bit);
                    if !value {
                        last_zero = Some(bit);
                    }
                    value
                }
                (bit0, _) => bit0,
            };

            address.set_bit(bit, value);
            self.write_bit(value)?;
        }

        search.address = address;
        match last_zero {
            None => search.done = true,
            Some(bit) => search.last_branch = Some(bit),
        }
        Ok(Some(address))
    }

    /// Enumerates every device on the bus into `out`, in discovery order.
    ///
    /// Only addresses with a valid CRC are stored. The entry after the last
    /// stored address is set to [`Address::SENTINEL`], so at most
    /// `out.len() - 1` devices are recorded. This holds when a round fails
    /// too: `out` then lists the devices found before the error.
    pub fn discover(&mut self, out: &mut [Address]) -> Result<Discovery, Error<E>> {
        if out.is_empty() {
            return Err(Error::BufferTooSmall);
        }

        let mut discovery = Discovery::default();
        let mut search = DeviceSearch::new();
        // the list stays terminated on every exit path
        out[0] = Address::SENTINEL;
        while let Some(address) = self.search_next(&mut search)? {
            // an all-zero code passes the CRC but would end the list
            if address.is_sentinel() || !address.is_valid() {
                discovery.rejected += 1;
                log::warn!("discarding invalid ROM code {address}");
                continue;
            }
            if discovery.found + 1 == out.len() {
                discovery.truncated = true;
                log::warn!("no room for {address}, stopping after {} devices", discovery.found);
                break;
            }
            log::debug!("found device {} at {address}", discovery.found + 1);
            out[discovery.found] = address;
            discovery.found += 1;
            out[discovery.found] = Address::SENTINEL;
        }
        Ok(discovery)
    }
}
