//! ROM command constants for 1-Wire communication.

/// Command to match a specific ROM address. Followed by the 64-bit ROM code,
/// only the device whose code matches every bit responds to the next
/// function command.
pub const ONEWIRE_MATCH_ROM_CMD: u8 = 0x55;

/// Command to skip ROM addressing. Every device on the bus takes the next
/// function command, so this is only safe when exactly one device is present
/// or the command is a broadcast (e.g. start conversion on all sensors).
pub const ONEWIRE_SKIP_ROM_CMD: u8 = 0xcc;

/// Command to read the ROM code of the only device on the bus.
///
/// With more than one device attached, the codes are wire-ANDed together and
/// the result fails its CRC.
pub const ONEWIRE_READ_ROM_CMD: u8 = 0x33;

/// Command to search for devices on the 1-Wire bus
pub const ONEWIRE_SEARCH_CMD: u8 = 0xf0;

/// Command to search for devices in alarm state on the 1-Wire bus
pub const ONEWIRE_CONDITIONAL_SEARCH_CMD: u8 = 0xec;
