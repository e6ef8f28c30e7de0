use crate::{compute_crc8, Error};
use core::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    ops::Deref,
    str::FromStr,
};

/// 64-bit ROM code: family code, 48-bit serial number and CRC-8, in bus order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Address {
    raw: [u8; Self::BYTES as usize],
}

impl From<[u8; Self::BYTES as usize]> for Address {
    fn from(raw: [u8; Self::BYTES as usize]) -> Self {
        Address { raw }
    }
}

impl From<Address> for [u8; Address::BYTES as usize] {
    fn from(addr: Address) -> [u8; Address::BYTES as usize] {
        addr.raw
    }
}

/// The family code ends up in the most significant byte.
impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address {
            raw: value.to_be_bytes(),
        }
    }
}

impl From<Address> for u64 {
    fn from(addr: Address) -> u64 {
        u64::from_be_bytes(addr.raw)
    }
}

impl Deref for Address {
    type Target = [u8; Self::BYTES as usize];

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}

impl Address {
    /// The length of device address in bytes
    pub const BYTES: u8 = 8;

    /// The length of device address in bits
    pub const BITS: u8 = Self::BYTES * 8;

    /// All-zero address terminating a list of discovered addresses
    pub const SENTINEL: Address = Address {
        raw: [0; Self::BYTES as usize],
    };

    pub fn family_code(&self) -> u8 {
        self.raw[0]
    }

    pub fn serial(&self) -> [u8; 6] {
        let mut serial = [0u8; 6];
        serial.copy_from_slice(&self.raw[1..7]);
        serial
    }

    pub fn crc(&self) -> u8 {
        self.raw[7]
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }

    /// Whether the trailing CRC byte matches the CRC-8 over the first seven bytes
    pub fn is_valid(&self) -> bool {
        compute_crc8(&self.raw[..7]) == self.crc()
    }

    pub fn ensure_valid<E: Debug>(&self) -> Result<(), Error<E>> {
        let computed = compute_crc8(&self.raw[..7]);
        if computed != self.crc() {
            Err(Error::CrcMismatch(computed, self.crc()))
        } else {
            Ok(())
        }
    }

    /// Bit `bit` in bus order: bit 0 is the least significant bit of the family code.
    ///
    /// Positions past the CRC byte read as zero.
    pub fn bit(&self, bit: u8) -> bool {
        if bit >= Self::BITS {
            return false;
        }
        self.raw[(bit / 8) as usize] & (0x01 << (bit % 8)) != 0x00
    }

    /// Positions past the CRC byte are ignored.
    pub fn set_bit(&mut self, bit: u8, value: bool) {
        if bit >= Self::BITS {
            return;
        }
        let index = (bit / 8) as usize;
        let mask = 0x01 << (bit % 8);
        if value {
            self.raw[index] |= mask;
        } else {
            self.raw[index] &= !mask;
        }
    }
}

/// Error type
#[derive(Debug, PartialEq)]
pub enum AddressError {
    NotEnough,
    Invalid,
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut raw = [0u8; Self::BYTES as usize];
        let mut chars = s.chars().filter(|c| !c.is_whitespace() && *c != ':');

        for byte in raw.iter_mut() {
            match (chars.next(), chars.next()) {
                (Some(h), Some(l)) => match (h.to_digit(16), l.to_digit(16)) {
                    (Some(h), Some(l)) => *byte = ((h << 4) | l) as u8,
                    _ => return Err(AddressError::Invalid),
                },
                _ => return Err(AddressError::NotEnough),
            }
        }
        if chars.next().is_some() {
            return Err(AddressError::Invalid);
        }

        Ok(Address { raw })
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self[0], self[1], self[2], self[3], self[4], self[5], self[6], self[7],
        )
    }
}
