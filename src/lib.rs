#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]

mod address;
mod command;
mod crc;
mod driver;
pub mod ds18b20;
mod iowire;
mod result;
mod search;
#[cfg(test)]
mod sim;

pub use address::{Address, AddressError};
pub use command::{Command, OpCode};
pub use crc::{compute_crc8, compute_partial_crc8};
pub use driver::Driver;
pub use iowire::{Inverted, IoWire};
pub use result::Error;
pub use search::{DeviceSearch, DeviceSearchIter, Discovery};
