//! CRC-8 and CRC-16 as used on the 1-Wire bus.
//!
//! The 8-bit CRC (polynomial x^8 + x^5 + x^4 + 1, processed LSB first) guards
//! every ROM code and most device memory blocks. The 16-bit CRC is used by
//! memory and switch devices, and is transmitted inverted.

/// Reflected form of the CRC-8 polynomial `0b1_0011_0001`.
const CRC8_POLY: u8 = 0x8c;

/// Reflected form of the CRC-16 polynomial `x^16 + x^15 + x^2 + 1`.
const CRC16_POLY: u16 = 0xa001;

#[cfg(feature = "crc-table")]
static CRC8_TABLE: [u8; 256] = crc8_table();

#[cfg(feature = "crc-table")]
const fn crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = crc8_bitwise(0, i as u8);
        i += 1;
    }
    table
}

const fn crc8_bitwise(crc: u8, byte: u8) -> u8 {
    let mut crc = crc ^ byte;
    let mut i = 0;
    while i < 8 {
        crc = if crc & 0x1 == 0x1 {
            (crc >> 1) ^ CRC8_POLY
        } else {
            crc >> 1
        };
        i += 1;
    }
    crc
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// Calculate CRC-8 used in 1-Wire communications.
pub struct OneWireCrc(u8);

impl OneWireCrc {
    /// Get the current CRC value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Update the CRC with the incoming byte.
    pub fn update(&mut self, byte: u8) {
        #[cfg(feature = "crc-table")]
        {
            self.0 = CRC8_TABLE[(self.0 ^ byte) as usize];
        }
        #[cfg(not(feature = "crc-table"))]
        {
            self.0 = crc8_bitwise(self.0, byte);
        }
    }

    /// Validate a sequence of bytes where the last byte is the 1-Wire CRC of
    /// the previous bytes.
    ///
    /// Running the CRC over data followed by its own CRC yields zero.
    pub fn validate(sequence: &[u8]) -> bool {
        !sequence.is_empty() && crc8(sequence) == 0
    }
}

/// Compute the 1-Wire CRC-8 over `bytes`.
pub fn crc8(bytes: &[u8]) -> u8 {
    let mut crc = OneWireCrc::default();
    for &byte in bytes {
        crc.update(byte);
    }
    crc.value()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// Calculate the CRC-16 used by 1-Wire memory devices.
pub struct OneWireCrc16(u16);

impl OneWireCrc16 {
    /// Start a CRC from `seed`. Devices that chain CRCs across pages pass the
    /// previous page's value here; everything else starts from zero.
    pub fn with_seed(seed: u16) -> Self {
        Self(seed)
    }

    /// Get the current CRC value.
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Update the CRC with the incoming byte.
    pub fn update(&mut self, byte: u8) {
        let mut crc = self.0 ^ byte as u16;
        for _ in 0..8 {
            if crc & 0x1 == 0x1 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
        self.0 = crc;
    }
}

/// Compute the 1-Wire CRC-16 over `bytes`, starting from `seed`.
///
/// This is the value before inversion: a device sends `!crc16(..)` on the wire,
/// least significant byte first. Use [`check_crc16`] to validate received data.
pub fn crc16(bytes: &[u8], seed: u16) -> u16 {
    let mut crc = OneWireCrc16::with_seed(seed);
    for &byte in bytes {
        crc.update(byte);
    }
    crc.value()
}

/// Check `bytes` against the two inverted CRC bytes received after them.
pub fn check_crc16(bytes: &[u8], inverted_crc: [u8; 2], seed: u16) -> bool {
    !crc16(bytes, seed) == u16::from_le_bytes(inverted_crc)
}
