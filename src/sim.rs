//! Open-drain line model for tests.
//!
//! The line keeps a virtual microsecond clock advanced only by [`SimDelay`].
//! A slot opens on every falling edge the master drives and closes on the next
//! one (or on [`SimBus::flush`]). Devices see a closed slot as a written bit:
//! one when the master held the line low for less than 15µs. While a device
//! transmits, it holds the line low for the first 15µs of the slot to send a
//! zero. A low pulse of 480µs or more resets every device, which then answers
//! with a presence pulse from 20µs to 140µs after release.

use crate::{compute_crc8, Address, Driver};
use core::convert::Infallible;
use embedded_hal::delay::DelayNs;
use std::{
    cell::{Ref, RefCell},
    collections::VecDeque,
    rc::Rc,
    vec::Vec,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    Low(u64),
    Release(u64),
    Sample(u64, bool),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    RomCommand,
    Search { bit: u8, step: u8 },
    Match { bit: u8 },
    Function,
    Transmit { data: [u8; 9], len: usize, bit: usize },
    Receive { data: [u8; 3], bit: usize },
}

#[derive(Debug, Clone)]
pub struct SimDevice {
    rom: Address,
    scratchpad: [u8; 9],
    temperature: i16,
    alarmed: bool,
    mute: bool,
    quiet_after: Option<usize>,
    resets: usize,
    parasite: bool,
    eeprom: [u8; 3],
    conversions: usize,
    phase: Phase,
    shift: u8,
    bits: u8,
}

impl SimDevice {
    pub fn new(rom: Address) -> Self {
        let mut scratchpad = [0x50, 0x05, 0x4B, 0x46, 0x7F, 0xFF, 0x0C, 0x10, 0x00];
        scratchpad[8] = compute_crc8(&scratchpad[..8]);
        SimDevice {
            rom,
            scratchpad,
            temperature: 0x0550,
            alarmed: false,
            mute: false,
            quiet_after: None,
            resets: 0,
            parasite: false,
            eeprom: [0x4B, 0x46, 0x7F],
            conversions: 0,
            phase: Phase::Idle,
            shift: 0,
            bits: 0,
        }
    }

    /// Builds a ROM code with a correct CRC.
    pub fn rom(family: u8, serial: [u8; 6]) -> Address {
        let mut raw = [family, 0, 0, 0, 0, 0, 0, 0];
        raw[1..7].copy_from_slice(&serial);
        raw[7] = compute_crc8(&raw[..7]);
        Address::from(raw)
    }

    /// Raw sensor register value, 1/16 degree per LSB.
    pub fn with_temperature(mut self, raw: i16) -> Self {
        self.temperature = raw;
        self
    }

    pub fn alarmed(mut self) -> Self {
        self.alarmed = true;
        self
    }

    /// Answers resets but never drives a data bit.
    pub fn mute(mut self) -> Self {
        self.mute = true;
        self
    }

    /// Stops driving data bits after `resets` reset pulses.
    pub fn quiet_after(mut self, resets: usize) -> Self {
        self.quiet_after = Some(resets);
        self
    }

    pub fn parasite(mut self) -> Self {
        self.parasite = true;
        self
    }

    pub fn conversions(&self) -> usize {
        self.conversions
    }

    pub fn scratchpad(&self) -> [u8; 9] {
        self.scratchpad
    }

    pub fn eeprom(&self) -> [u8; 3] {
        self.eeprom
    }

    pub fn is_selected(&self) -> bool {
        self.phase == Phase::Function
    }

    fn reset(&mut self) {
        self.phase = Phase::RomCommand;
        self.resets += 1;
        self.shift = 0;
        self.bits = 0;
    }

    fn shift_in(&mut self, bit: bool) -> Option<u8> {
        self.shift >>= 1;
        if bit {
            self.shift |= 0x80;
        }
        self.bits += 1;
        if self.bits == 8 {
            self.bits = 0;
            Some(self.shift)
        } else {
            None
        }
    }

    fn transmit(data: &[u8]) -> Phase {
        let mut buf = [0u8; 9];
        buf[..data.len()].copy_from_slice(data);
        Phase::Transmit {
            data: buf,
            len: data.len(),
            bit: 0,
        }
    }

    fn output(&self) -> Option<bool> {
        if self.mute || self.quiet_after.is_some_and(|resets| self.resets > resets) {
            return None;
        }
        match self.phase {
            Phase::Search { bit, step: 0 } => Some(self.rom.bit(bit)),
            Phase::Search { bit, step: 1 } => Some(!self.rom.bit(bit)),
            Phase::Transmit { data, len, bit } if bit < len * 8 => {
                Some(data[bit / 8] & (1 << (bit % 8)) != 0)
            }
            _ => None,
        }
    }

    fn clock(&mut self, input: bool) {
        match self.phase {
            Phase::Idle => {}
            Phase::RomCommand => {
                if let Some(cmd) = self.shift_in(input) {
                    self.phase = match cmd {
                        0xF0 => Phase::Search { bit: 0, step: 0 },
                        0xEC if self.alarmed => Phase::Search { bit: 0, step: 0 },
                        0x55 => Phase::Match { bit: 0 },
                        0xCC => Phase::Function,
                        0x33 => Self::transmit(self.rom.as_ref()),
                        _ => Phase::Idle,
                    };
                }
            }
            Phase::Search { bit, step } if step < 2 => {
                self.phase = Phase::Search { bit, step: step + 1 };
            }
            Phase::Search { bit, .. } => {
                self.phase = if input != self.rom.bit(bit) {
                    Phase::Idle
                } else if bit + 1 == Address::BITS {
                    Phase::Function
                } else {
                    Phase::Search {
                        bit: bit + 1,
                        step: 0,
                    }
                };
            }
            Phase::Match { bit } => {
                self.phase = if input != self.rom.bit(bit) {
                    Phase::Idle
                } else if bit + 1 == Address::BITS {
                    Phase::Function
                } else {
                    Phase::Match { bit: bit + 1 }
                };
            }
            Phase::Function => {
                if let Some(cmd) = self.shift_in(input) {
                    self.phase = match cmd {
                        0x44 => {
                            self.conversions += 1;
                            self.scratchpad[..2].copy_from_slice(&self.temperature.to_le_bytes());
                            self.scratchpad[8] = compute_crc8(&self.scratchpad[..8]);
                            Phase::Idle
                        }
                        0xBE => Self::transmit(&self.scratchpad),
                        0x4E => Phase::Receive {
                            data: [0; 3],
                            bit: 0,
                        },
                        0x48 => {
                            self.eeprom.copy_from_slice(&self.scratchpad[2..5]);
                            Phase::Idle
                        }
                        0xB8 => {
                            self.scratchpad[2..5].copy_from_slice(&self.eeprom);
                            self.scratchpad[8] = compute_crc8(&self.scratchpad[..8]);
                            Phase::Idle
                        }
                        0xB4 => Self::transmit(&[if self.parasite { 0x00 } else { 0xFF }]),
                        _ => Phase::Idle,
                    };
                }
            }
            Phase::Transmit { data, len, bit } => {
                self.phase = Phase::Transmit {
                    data,
                    len,
                    bit: bit + 1,
                };
            }
            Phase::Receive { mut data, bit } => {
                if input {
                    data[bit / 8] |= 1 << (bit % 8);
                }
                self.phase = if bit + 1 == 24 {
                    self.scratchpad[2..5].copy_from_slice(&data);
                    self.scratchpad[8] = compute_crc8(&self.scratchpad[..8]);
                    Phase::Idle
                } else {
                    Phase::Receive { data, bit: bit + 1 }
                };
            }
        }
    }
}

#[derive(Default)]
struct Line {
    now: u64,
    master_low: bool,
    fall_at: u64,
    low_for: u64,
    slot_open: bool,
    slot_sampled: bool,
    reset_at: Option<u64>,
    stuck_low: bool,
    loopback: Option<VecDeque<bool>>,
    devices: Vec<SimDevice>,
    events: Vec<Event>,
    written: Vec<bool>,
}

impl Line {
    fn level(&self) -> bool {
        if self.stuck_low || self.master_low {
            return false;
        }
        if let Some(released) = self.reset_at {
            let since = self.now - released;
            if (20..140).contains(&since) && !self.devices.is_empty() {
                return false;
            }
        }
        if self.slot_open && self.now - self.fall_at <= 15 {
            if let Some(queue) = &self.loopback {
                return queue.front().copied().unwrap_or(true);
            }
            return !self.devices.iter().any(|d| d.output() == Some(false));
        }
        true
    }

    fn close_slot(&mut self) {
        if !self.slot_open {
            return;
        }
        self.slot_open = false;
        let bit = self.low_for < 15;
        if let Some(queue) = &mut self.loopback {
            if self.slot_sampled {
                queue.pop_front();
            } else {
                queue.push_back(bit);
            }
        }
        if !self.slot_sampled {
            self.written.push(bit);
        }
        for device in self.devices.iter_mut() {
            device.clock(bit);
        }
    }
}

/// Shared handle on the simulated line.
#[derive(Clone, Default)]
pub struct SimBus(Rc<RefCell<Line>>);

pub struct SimWire(Rc<RefCell<Line>>);

pub struct SimDelay(Rc<RefCell<Line>>);

impl SimBus {
    pub fn new() -> Self {
        SimBus::default()
    }

    pub fn with_device(self, device: SimDevice) -> Self {
        self.0.borrow_mut().devices.push(device);
        self
    }

    pub fn wire(&self) -> SimWire {
        SimWire(self.0.clone())
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay(self.0.clone())
    }

    /// An initialized driver with the event log cleared.
    pub fn driver(&self) -> Driver<SimWire, SimDelay> {
        let mut driver = Driver::new(self.wire(), self.delay());
        driver.init().unwrap();
        self.clear_events();
        driver
    }

    pub fn now(&self) -> u64 {
        self.0.borrow().now
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        let mut line = self.0.borrow_mut();
        line.events.clear();
        line.written.clear();
    }

    pub fn flush(&self) {
        self.0.borrow_mut().close_slot();
    }

    /// Bits the master wrote since the last [`clear_events`](SimBus::clear_events).
    pub fn written_bits(&self) -> Vec<bool> {
        self.flush();
        self.0.borrow().written.clone()
    }

    pub fn written_bytes(&self) -> Vec<u8> {
        self.written_bits()
            .chunks(8)
            .map(|bits| {
                bits.iter()
                    .enumerate()
                    .fold(0u8, |byte, (i, bit)| byte | ((*bit as u8) << i))
            })
            .collect()
    }

    pub fn set_stuck_low(&self, stuck: bool) {
        self.0.borrow_mut().stuck_low = stuck;
    }

    /// Makes read slots return the bits written before them, in order.
    pub fn set_loopback(&self, enabled: bool) {
        self.0.borrow_mut().loopback = enabled.then(VecDeque::new);
    }

    pub fn device(&self, index: usize) -> Ref<'_, SimDevice> {
        Ref::map(self.0.borrow(), |line| &line.devices[index])
    }
}

impl crate::IoWire for SimWire {
    type Error = Infallible;

    fn drive_low(&mut self) -> Result<(), Self::Error> {
        let mut line = self.0.borrow_mut();
        if line.master_low {
            return Ok(());
        }
        line.close_slot();
        line.reset_at = None;
        line.master_low = true;
        line.fall_at = line.now;
        line.slot_sampled = false;
        let now = line.now;
        line.events.push(Event::Low(now));
        Ok(())
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        let mut line = self.0.borrow_mut();
        if !line.master_low {
            return Ok(());
        }
        line.master_low = false;
        line.low_for = line.now - line.fall_at;
        let now = line.now;
        line.events.push(Event::Release(now));
        if line.low_for >= 480 {
            line.reset_at = Some(now);
            for device in line.devices.iter_mut() {
                device.reset();
            }
        } else {
            line.slot_open = true;
        }
        Ok(())
    }

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        let mut line = self.0.borrow_mut();
        let level = line.level();
        if line.slot_open && line.now - line.fall_at <= 15 {
            line.slot_sampled = true;
        }
        let now = line.now;
        line.events.push(Event::Sample(now, level));
        Ok(level)
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().now += u64::from(ns).div_ceil(1000);
    }

    fn delay_us(&mut self, us: u32) {
        self.0.borrow_mut().now += u64::from(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.0.borrow_mut().now += u64::from(ms) * 1000;
    }
}
