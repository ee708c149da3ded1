#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]
//! # onewire-bitbang
//! A no-std 1-Wire bus master that generates the protocol in software on a single GPIO line.
//!
//! The platform supplies a [Line]: a pin that can pull the bus low, let it float, and be
//! sampled, plus a microsecond delay. [OneWireMaster] builds the reset/presence sequence
//! and the read and write time slots on top of it, and implements the [OneWire] trait,
//! which provides byte transfers and ROM addressing.
//!
//! Devices are discovered with [OneWireSearch], an implementation of the
//! [1-Wire search algorithm](https://www.analog.com/en/resources/app-notes/1wire-search-algorithm.html),
//! and data is checked with [crc8] and [crc16].
//!
//! ```ignore
//! let mut bus = OneWireMaster::new(line)?;
//! let mut search = OneWireSearch::new(&mut bus, OneWireSearchKind::Normal);
//! while let Some(rom) = search.next()? {
//!     log::info!("found {rom}");
//! }
//! ```
//!
//! With the `sim` feature, the [sim] module provides a simulated bus for host-side tests.

pub mod consts;
mod crc;
mod error;
mod line;
mod master;
mod rom;
mod search;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod traits;

pub use consts::{
    ONEWIRE_CONDITIONAL_SEARCH_CMD, ONEWIRE_MATCH_ROM_CMD, ONEWIRE_READ_ROM_CMD,
    ONEWIRE_SEARCH_CMD, ONEWIRE_SKIP_ROM_CMD,
};
pub use crc::{OneWireCrc, OneWireCrc16, check_crc16, crc8, crc16};
pub use error::OneWireError;
pub use line::{Line, Timing};
pub use master::{OneWireMaster, OneWireMasterBuilder};
pub use rom::{Rom, RomParseError};
pub use search::{OneWireSearch, OneWireSearchKind, SearchState};
pub use traits::OneWire;

/// Error type for 1-Wire operations.
pub type OneWireResult<T, E> = Result<T, OneWireError<E>>;
