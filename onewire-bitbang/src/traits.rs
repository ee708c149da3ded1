use crate::{
    OneWireError, OneWireResult, Rom,
    consts::{ONEWIRE_MATCH_ROM_CMD, ONEWIRE_READ_ROM_CMD, ONEWIRE_SKIP_ROM_CMD},
};

/// Trait for 1-Wire communication.
/// This trait defines the basic operations required for 1-Wire communication, such as resetting the bus,
/// writing and reading bytes, and writing and reading bits.
///
/// Only the bit-level operations are required; byte transfers, ROM addressing and the
/// search triplet are built on top of them and may be overridden by masters that have
/// hardware support for them.
pub trait OneWire {
    /// The error type returned by the operations of this trait.
    /// This type is used to indicate errors in the underlying hardware or communication.
    type BusError;

    /// Resets the 1-Wire bus.
    ///
    /// # Returns
    /// `true` if at least one device answered with a presence pulse. A bus
    /// that is empty, shorted or stuck low returns `false`.
    ///
    /// # Errors
    /// This method returns an error if the underlying line fails.
    fn reset(&mut self) -> OneWireResult<bool, Self::BusError>;

    /// Writes a single bit in one write time slot.
    ///
    /// # Errors
    /// This method returns an error if the underlying line fails.
    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError>;

    /// Reads a single bit in one read time slot.
    /// # Returns
    /// The bit read from the bus.
    /// # Errors
    /// This method returns an error if the underlying line fails.
    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError>;

    /// Drive the bus high to power parasitic devices, e.g. during a
    /// temperature conversion. Ended by [`depower`](OneWire::depower) or the
    /// next time slot.
    fn power(&mut self) -> OneWireResult<(), Self::BusError>;

    /// Stop forcing power onto the bus and leave it to the pull-up.
    fn depower(&mut self) -> OneWireResult<(), Self::BusError>;

    /// Writes a byte to the 1-Wire bus, least significant bit first.
    /// # Arguments
    /// * `byte` - The byte to write to the bus.
    ///
    /// # Errors
    /// This method returns an error if the write operation fails.
    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        for i in 0..8 {
            self.write_bit(byte & (1 << i) != 0)?;
        }
        self.depower()
    }

    /// Writes a byte and leaves the bus powered afterwards.
    ///
    /// The caller is responsible for calling [`depower`](OneWire::depower) or
    /// starting another slot.
    fn write_byte_powered(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        for i in 0..8 {
            self.write_bit(byte & (1 << i) != 0)?;
        }
        self.power()
    }

    /// Reads a byte from the 1-Wire bus, least significant bit first.
    /// # Returns
    /// Byte read from the bus.
    ///
    /// # Errors
    /// This method returns an error if the read operation fails.
    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        let mut byte = 0;
        for i in 0..8 {
            if self.read_bit()? {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }

    /// Writes every byte of `bytes` in order.
    fn write_bytes(&mut self, bytes: &[u8]) -> OneWireResult<(), Self::BusError> {
        for &b in bytes {
            self.write_byte(b)?;
        }
        Ok(())
    }

    /// Writes every byte of `bytes` and leaves the bus powered afterwards.
    fn write_bytes_powered(&mut self, bytes: &[u8]) -> OneWireResult<(), Self::BusError> {
        for &b in bytes {
            self.write_byte(b)?;
        }
        self.power()
    }

    /// Fills `buf` with bytes read from the bus.
    fn read_bytes(&mut self, buf: &mut [u8]) -> OneWireResult<(), Self::BusError> {
        for b in buf.iter_mut() {
            *b = self.read_byte()?;
        }
        Ok(())
    }

    /// Issues a Match ROM command for `rom`. The bus must have been reset first.
    fn select(&mut self, rom: &Rom) -> OneWireResult<(), Self::BusError> {
        self.write_byte(ONEWIRE_MATCH_ROM_CMD)?;
        self.write_bytes(rom.as_bytes())
    }

    /// Issues a Skip ROM command, addressing every device on the bus. The bus
    /// must have been reset first.
    fn skip(&mut self) -> OneWireResult<(), Self::BusError> {
        self.write_byte(ONEWIRE_SKIP_ROM_CMD)
    }

    /// Reads the ROM code of the only device on the bus.
    ///
    /// # Errors
    /// [`OneWireError::NoDevicePresent`] if nothing answers the reset, and
    /// [`OneWireError::InvalidCrc`] if the code read back is corrupt, which is
    /// also what happens when more than one device is attached.
    fn read_rom(&mut self) -> OneWireResult<Rom, Self::BusError> {
        if !self.reset()? {
            return Err(OneWireError::NoDevicePresent);
        }
        self.write_byte(ONEWIRE_READ_ROM_CMD)?;
        let mut bytes = [0u8; 8];
        self.read_bytes(&mut bytes)?;
        let rom = Rom::from(bytes);
        if !rom.is_valid() {
            return Err(OneWireError::InvalidCrc);
        }
        Ok(rom)
    }

    /// Addresses devices on the 1-Wire bus.
    /// Resets the bus, then selects `rom`, or every device if `rom` is [`None`].
    /// # Errors
    /// [`OneWireError::NoDevicePresent`] if nothing answers the reset.
    fn address(&mut self, rom: Option<&Rom>) -> OneWireResult<(), Self::BusError> {
        if !self.reset()? {
            return Err(OneWireError::NoDevicePresent);
        }
        match rom {
            Some(rom) => self.select(rom),
            None => self.skip(),
        }
    }

    /// # Note: Not intended for public API use.
    /// ## This method is internally used by the [search algorithm](https://www.analog.com/en/resources/app-notes/1wire-search-algorithm.html).
    ///
    /// Generates three time slots: two read time slots and one write time slot. The
    /// type of write time slot depends on the result of the read time slots and the
    /// direction bit. The direction determines the write time slot if both read time
    /// slots are 0 (two devices disagree on this bit).
    /// If the read time slots are 0 and 1, they are followed by a write-zero time slot.
    /// If the read time slots are 1 and 0, they are followed by a write-one time slot.
    /// If the read time slots are both 1, no device is left in the search and no write
    /// time slot is generated.
    ///
    /// # Returns
    /// A tuple of the id bit, the complement bit, and the direction taken.
    fn read_triplet(&mut self, direction: bool) -> OneWireResult<(bool, bool, bool), Self::BusError> {
        let id_bit = self.read_bit()?;
        let complement_bit = self.read_bit()?;
        if id_bit && complement_bit {
            return Ok((true, true, true));
        }
        let taken = if id_bit != complement_bit {
            id_bit
        } else {
            direction
        };
        self.write_bit(taken)?;
        Ok((id_bit, complement_bit, taken))
    }
}
