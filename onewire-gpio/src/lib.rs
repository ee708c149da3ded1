#![no_std]
#![deny(missing_docs)]

/*! # onewire-gpio
 *
 * Drives a [`OneWireMaster`](onewire_bitbang::OneWireMaster) from an
 * [embedded-hal](embedded_hal) open-drain pin and a [`DelayNs`] timer.
 *
 * The pin must be configured as an open-drain output with an external
 * pull-up (typically 4.7 kΩ), and must be readable while in that mode:
 * setting it high lets the bus float, setting it low pulls the bus down.
 */

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};
use onewire_bitbang::Line;

pub use onewire_bitbang::{OneWire, OneWireError, OneWireMaster, OneWireResult, Rom};

/// A 1-Wire line on an open-drain GPIO pin.
///
/// Takes ownership of a pin (implementing both [`OutputPin`] and [`InputPin`])
/// and a timer object implementing the [`DelayNs`] trait.
#[derive(Debug)]
pub struct GpioLine<P, D> {
    pin: P,
    delay: D,
    release_latency_us: u32,
}

impl<P, D> GpioLine<P, D> {
    /// Creates a new line on `pin`, assuming the pin switches within a
    /// microsecond.
    pub fn new(pin: P, delay: D) -> Self {
        GpioLine {
            pin,
            delay,
            release_latency_us: 1,
        }
    }

    /// Set the time it takes between a release of the pin and the bus being
    /// observable again, in microseconds.
    ///
    /// This includes the driver overhead of the pin writes and reads, and the
    /// rise time of the bus through the pull-up.
    pub fn with_release_latency_us(mut self, us: u32) -> Self {
        self.release_latency_us = us;
        self
    }

    /// Returns the pin and the timer.
    pub fn into_parts(self) -> (P, D) {
        (self.pin, self.delay)
    }
}

impl<P, D> Line for GpioLine<P, D>
where
    P: OutputPin + InputPin,
    D: DelayNs,
{
    type Error = P::Error;

    fn drive_low(&mut self) -> Result<(), Self::Error> {
        self.pin.set_low()
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        self.pin.set_high()
    }

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.pin.is_high()
    }

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }

    fn release_latency_us(&mut self) -> Result<u32, Self::Error> {
        Ok(self.release_latency_us)
    }
}
