use core::{fmt, str::FromStr};

use crate::crc::{OneWireCrc, crc8};

/// 64-bit ROM code of a 1-Wire device, in transmission order.
///
/// | Byte | Description |
/// |------|-------------|
/// | 0    | Family code (e.g., 0x28 for DS18B20) |
/// | 1-6  | Serial number, least significant byte first |
/// | 7    | CRC-8 of bytes 0-6 |
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rom([u8; 8]);

impl Rom {
    /// Build a ROM code from a family code and a 48-bit serial number,
    /// computing the CRC byte.
    pub fn new(family: u8, serial: u64) -> Self {
        let mut bytes = [0u8; 8];
        bytes[0] = family;
        bytes[1..7].copy_from_slice(&serial.to_le_bytes()[..6]);
        bytes[7] = crc8(&bytes[..7]);
        Self(bytes)
    }

    /// Wrap raw bytes as read from the bus. The CRC is not checked.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Raw bytes in transmission order.
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Family code, identifying the device type.
    pub const fn family(&self) -> u8 {
        self.0[0]
    }

    /// 48-bit serial number.
    pub fn serial(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes[..6].copy_from_slice(&self.0[1..7]);
        u64::from_le_bytes(bytes)
    }

    /// CRC byte as stored in the code.
    pub const fn crc(&self) -> u8 {
        self.0[7]
    }

    /// True if the stored CRC matches the CRC-8 of the first seven bytes.
    pub fn is_valid(&self) -> bool {
        OneWireCrc::validate(&self.0)
    }

    /// Bit `index` (0-based, in search order) of the code.
    pub(crate) fn bit(&self, index: u8) -> bool {
        self.0[(index / 8) as usize] & (1 << (index % 8)) != 0
    }
}

impl From<[u8; 8]> for Rom {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

impl From<Rom> for [u8; 8] {
    fn from(rom: Rom) -> Self {
        rom.0
    }
}

/// Byte 0 (family code) is the least significant byte.
impl From<u64> for Rom {
    fn from(value: u64) -> Self {
        Self(value.to_le_bytes())
    }
}

impl From<Rom> for u64 {
    fn from(rom: Rom) -> Self {
        u64::from_le_bytes(rom.0)
    }
}

impl fmt::Display for Rom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Error parsing a [`Rom`] from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomParseError {
    /// Not exactly 16 hex digits.
    InvalidLength,
    /// A character other than a hex digit or a `:`/`-` separator.
    InvalidDigit,
}

impl fmt::Display for RomParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength => f.write_str("a ROM code has exactly 16 hex digits"),
            Self::InvalidDigit => f.write_str("invalid hex digit in ROM code"),
        }
    }
}

impl core::error::Error for RomParseError {}

/// Parses 16 hex digits in transmission order, e.g. `28ff641e0f000034` or
/// `28:ff:64:1e:0f:00:00:34`.
impl FromStr for Rom {
    type Err = RomParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 8];
        let mut nibbles = 0usize;
        for c in s.chars() {
            if c == ':' || c == '-' {
                continue;
            }
            let digit = c.to_digit(16).ok_or(RomParseError::InvalidDigit)? as u8;
            if nibbles >= 16 {
                return Err(RomParseError::InvalidLength);
            }
            let byte = &mut bytes[nibbles / 2];
            *byte = (*byte << 4) | digit;
            nibbles += 1;
        }
        if nibbles != 16 {
            return Err(RomParseError::InvalidLength);
        }
        Ok(Self(bytes))
    }
}
