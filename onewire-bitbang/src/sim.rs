//! A simulated 1-Wire bus for exercising the master without hardware.
//!
//! [`SimLine`] models the open-drain line in virtual time: the master's
//! delays advance a microsecond clock, and the attached [`SimDevice`]s pull the
//! line low the way real slaves do (presence pulse after a reset, zero bits in
//! read slots). Devices understand the ROM commands (search, alarm search,
//! match, skip, read ROM); once addressed they take one function command byte
//! and then answer read slots with their data block.

use core::convert::Infallible;

use heapless::Vec;
use log::warn;

use crate::{
    Line, Rom,
    consts::{
        ONEWIRE_CONDITIONAL_SEARCH_CMD, ONEWIRE_MATCH_ROM_CMD, ONEWIRE_READ_ROM_CMD,
        ONEWIRE_SEARCH_CMD, ONEWIRE_SKIP_ROM_CMD,
    },
};

/// Maximum size of a simulated device's data block.
pub const SIM_DATA_LEN: usize = 32;

/// Shortest low pulse that devices take as a reset.
const RESET_MIN_US: u64 = 480;
/// Low pulses at least this long are write-zero slots.
const WRITE_ZERO_MIN_US: u64 = 15;
/// How long a device holds the line low to send a zero bit.
const DEVICE_LOW_US: u64 = 30;
/// Presence pulse window relative to the end of the reset pulse.
const PRESENCE_START_US: u64 = 15;
const PRESENCE_END_US: u64 = 135;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchPhase {
    IdBit,
    ComplementBit,
    Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    /// Waiting for the next reset pulse.
    Idle,
    RomCommand { byte: u8, bits: u8 },
    Search { bit: u8, phase: SearchPhase },
    Match { bit: u8 },
    SendRom { bit: u8 },
    FunctionCommand { byte: u8, bits: u8 },
    SendData { bit: u16 },
}

/// A simulated 1-Wire slave.
#[derive(Debug, Clone)]
pub struct SimDevice {
    rom: Rom,
    alarm: bool,
    data: Vec<u8, SIM_DATA_LEN>,
    state: DeviceState,
    pull_until: Option<u64>,
    command: Option<u8>,
}

impl SimDevice {
    /// A device answering to `rom`. The code is used as given, so devices
    /// with a corrupt CRC byte can be simulated too.
    pub fn new(rom: Rom) -> Self {
        Self {
            rom,
            alarm: false,
            data: Vec::new(),
            state: DeviceState::Idle,
            pull_until: None,
            command: None,
        }
    }

    /// Set whether the device takes part in an alarm search.
    pub fn with_alarm(mut self, alarm: bool) -> Self {
        self.alarm = alarm;
        self
    }

    /// Set the data block sent after a function command. Truncated to
    /// [`SIM_DATA_LEN`] bytes; reads past the end return `0xff`.
    pub fn with_data(mut self, data: &[u8]) -> Self {
        self.data.clear();
        let len = data.len().min(SIM_DATA_LEN);
        // Cannot fail, the length is clamped to the capacity.
        let _ = self.data.extend_from_slice(&data[..len]);
        self
    }

    /// ROM code of the device.
    pub fn rom(&self) -> Rom {
        self.rom
    }

    /// Last function command received while addressed.
    pub fn last_command(&self) -> Option<u8> {
        self.command
    }

    fn tx_bit(&self) -> Option<bool> {
        match self.state {
            DeviceState::Search {
                bit,
                phase: SearchPhase::IdBit,
            } => Some(self.rom.bit(bit)),
            DeviceState::Search {
                bit,
                phase: SearchPhase::ComplementBit,
            } => Some(!self.rom.bit(bit)),
            DeviceState::SendRom { bit } => Some(self.rom.bit(bit)),
            DeviceState::SendData { bit } => Some(
                self.data
                    .get((bit / 8) as usize)
                    .is_none_or(|b| b & (1 << (bit % 8)) != 0),
            ),
            _ => None,
        }
    }

    fn start_slot(&mut self, now: u64) {
        self.pull_until = match self.tx_bit() {
            Some(false) => Some(now + DEVICE_LOW_US),
            _ => None,
        };
    }

    fn on_reset(&mut self) {
        self.pull_until = None;
        self.state = DeviceState::RomCommand { byte: 0, bits: 0 };
    }

    fn on_slot(&mut self, written: bool) {
        let state = self.state;
        self.state = match state {
            DeviceState::Idle => DeviceState::Idle,
            DeviceState::RomCommand { byte, bits } => {
                let byte = byte | ((written as u8) << bits);
                if bits < 7 {
                    DeviceState::RomCommand {
                        byte,
                        bits: bits + 1,
                    }
                } else {
                    self.rom_command(byte)
                }
            }
            DeviceState::Search {
                bit,
                phase: SearchPhase::IdBit,
            } => DeviceState::Search {
                bit,
                phase: SearchPhase::ComplementBit,
            },
            DeviceState::Search {
                bit,
                phase: SearchPhase::ComplementBit,
            } => DeviceState::Search {
                bit,
                phase: SearchPhase::Direction,
            },
            DeviceState::Search {
                bit,
                phase: SearchPhase::Direction,
            } => {
                if written != self.rom.bit(bit) || bit == 63 {
                    DeviceState::Idle
                } else {
                    DeviceState::Search {
                        bit: bit + 1,
                        phase: SearchPhase::IdBit,
                    }
                }
            }
            DeviceState::Match { bit } => {
                if written != self.rom.bit(bit) {
                    DeviceState::Idle
                } else if bit == 63 {
                    DeviceState::FunctionCommand { byte: 0, bits: 0 }
                } else {
                    DeviceState::Match { bit: bit + 1 }
                }
            }
            DeviceState::SendRom { bit } => {
                if bit == 63 {
                    DeviceState::Idle
                } else {
                    DeviceState::SendRom { bit: bit + 1 }
                }
            }
            DeviceState::FunctionCommand { byte, bits } => {
                let byte = byte | ((written as u8) << bits);
                if bits < 7 {
                    DeviceState::FunctionCommand {
                        byte,
                        bits: bits + 1,
                    }
                } else {
                    self.command = Some(byte);
                    DeviceState::SendData { bit: 0 }
                }
            }
            DeviceState::SendData { bit } => DeviceState::SendData {
                bit: bit.saturating_add(1),
            },
        };
    }

    fn rom_command(&self, cmd: u8) -> DeviceState {
        match cmd {
            ONEWIRE_SEARCH_CMD => DeviceState::Search {
                bit: 0,
                phase: SearchPhase::IdBit,
            },
            ONEWIRE_CONDITIONAL_SEARCH_CMD if self.alarm => DeviceState::Search {
                bit: 0,
                phase: SearchPhase::IdBit,
            },
            ONEWIRE_MATCH_ROM_CMD => DeviceState::Match { bit: 0 },
            ONEWIRE_SKIP_ROM_CMD => DeviceState::FunctionCommand { byte: 0, bits: 0 },
            ONEWIRE_READ_ROM_CMD => DeviceState::SendRom { bit: 0 },
            _ => DeviceState::Idle,
        }
    }
}

/// A simulated open-drain line with up to `N` devices attached.
#[derive(Debug, Clone)]
pub struct SimLine<const N: usize> {
    devices: Vec<SimDevice, N>,
    now: u64,
    fell_at: Option<u64>,
    presence: Option<(u64, u64)>,
    powered: bool,
    stuck_low: bool,
    release_latency_us: u32,
    resets: u32,
    slots: u32,
}

impl<const N: usize> Default for SimLine<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SimLine<N> {
    /// An empty bus.
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            now: 0,
            fell_at: None,
            presence: None,
            powered: false,
            stuck_low: false,
            release_latency_us: 1,
            resets: 0,
            slots: 0,
        }
    }

    /// Attach a device to the bus.
    ///
    /// # Errors
    /// Returns the device back if `N` devices are already attached.
    pub fn attach(&mut self, device: SimDevice) -> Result<(), SimDevice> {
        self.devices.push(device)
    }

    /// Attach a device to the bus. Devices beyond the capacity are dropped.
    pub fn with_device(mut self, device: SimDevice) -> Self {
        if let Err(device) = self.attach(device) {
            warn!("simulated bus full, device {} not attached", device.rom());
        }
        self
    }

    /// Short the line to ground.
    pub fn with_stuck_low(mut self, stuck: bool) -> Self {
        self.stuck_low = stuck;
        self
    }

    /// Set the release latency reported to the master.
    pub fn with_release_latency_us(mut self, us: u32) -> Self {
        self.release_latency_us = us;
        self
    }

    /// Attached devices.
    pub fn devices(&self) -> &[SimDevice] {
        &self.devices
    }

    /// Virtual time elapsed on the bus.
    pub fn now_us(&self) -> u64 {
        self.now
    }

    /// Number of reset pulses seen.
    pub fn reset_count(&self) -> u32 {
        self.resets
    }

    /// Number of read and write time slots seen.
    pub fn slot_count(&self) -> u32 {
        self.slots
    }

    /// True while the master drives the line high.
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    fn pulled_low(&self) -> bool {
        self.stuck_low
            || self.fell_at.is_some()
            || self
                .presence
                .is_some_and(|(start, end)| (start..end).contains(&self.now))
            || self
                .devices
                .iter()
                .any(|d| d.pull_until.is_some_and(|until| self.now < until))
    }
}

impl<const N: usize> Line for SimLine<N> {
    type Error = Infallible;

    fn drive_low(&mut self) -> Result<(), Self::Error> {
        self.powered = false;
        if self.fell_at.is_none() {
            self.fell_at = Some(self.now);
            for device in self.devices.iter_mut() {
                device.start_slot(self.now);
            }
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        self.powered = false;
        let Some(fell_at) = self.fell_at.take() else {
            return Ok(());
        };
        let low = self.now - fell_at;
        if low >= RESET_MIN_US {
            self.resets += 1;
            self.presence = (!self.devices.is_empty())
                .then(|| (self.now + PRESENCE_START_US, self.now + PRESENCE_END_US));
            for device in self.devices.iter_mut() {
                device.on_reset();
            }
        } else {
            self.slots += 1;
            let bit = low < WRITE_ZERO_MIN_US;
            for device in self.devices.iter_mut() {
                device.on_slot(bit);
            }
        }
        Ok(())
    }

    fn drive_high(&mut self) -> Result<(), Self::Error> {
        self.release()?;
        self.powered = true;
        Ok(())
    }

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.pulled_low())
    }

    fn delay_us(&mut self, us: u32) {
        self.now += us as u64;
    }

    fn release_latency_us(&mut self) -> Result<u32, Self::Error> {
        Ok(self.release_latency_us)
    }
}
