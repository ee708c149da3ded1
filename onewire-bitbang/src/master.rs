use log::{debug, error, trace, warn};

use crate::{Line, OneWire, OneWireError, OneWireResult, Timing};

/// Shortest reset pulse every device recognizes.
const RESET_LOW_MIN_US: u32 = 480;

/// Builder for creating a [`OneWireMaster`] instance with custom timing.
#[derive(Debug, Default, Clone, Copy)]
pub struct OneWireMasterBuilder {
    pub(crate) timing: Timing,
}

impl OneWireMasterBuilder {
    /// Sets every slot timing at once.
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Sets the read sample point, measured from the falling edge of a read
    /// slot. Must be larger than the line's release latency.
    pub fn with_sample_point_us(mut self, us: u32) -> Self {
        self.timing.sample_point_us = us;
        self
    }

    /// Builds a new [`OneWireMaster`] on `line`.
    ///
    /// Fails with [`OneWireError::InvalidTiming`] if the reset pulse is
    /// shorter than the 480 us devices need to recognize it. Then queries the
    /// line's release latency and fails with [`OneWireError::Calibration`] if
    /// it does not leave time to sample a read slot before the configured
    /// sample point.
    pub fn build<L: Line>(self, mut line: L) -> OneWireResult<OneWireMaster<L>, L::Error> {
        if self.timing.reset_low_us < RESET_LOW_MIN_US {
            error!(
                "1-Wire reset pulse of {} us is shorter than {RESET_LOW_MIN_US} us",
                self.timing.reset_low_us
            );
            return Err(OneWireError::InvalidTiming);
        }
        let latency_us = line.release_latency_us()?;
        let sample_point_us = self.timing.sample_point_us;
        if latency_us >= sample_point_us {
            error!(
                "1-Wire line release latency {latency_us} us reaches the {sample_point_us} us sample point"
            );
            return Err(OneWireError::Calibration {
                latency_us,
                sample_point_us,
            });
        }
        line.release()?;
        debug!("1-Wire master ready, release latency {latency_us} us, sample point {sample_point_us} us");
        Ok(OneWireMaster {
            line,
            timing: self.timing,
            sample_delay_us: sample_point_us - latency_us,
        })
    }
}

/// A 1-Wire bus master that generates every time slot in software on a
/// [`Line`].
///
/// Each slot runs inside a critical section so that an interrupt cannot
/// stretch it past the tolerance of the devices.
#[derive(Debug)]
pub struct OneWireMaster<L> {
    line: L,
    timing: Timing,
    sample_delay_us: u32,
}

impl<L: Line> OneWireMaster<L> {
    /// Creates a master with standard-speed [`Timing`].
    pub fn new(line: L) -> OneWireResult<Self, L::Error> {
        OneWireMasterBuilder::default().build(line)
    }

    /// Waits for the line to float high. Returns `false` if it stays low.
    fn wait_idle(&mut self) -> Result<bool, L::Error> {
        self.line.release()?;
        for _ in 0..self.timing.idle_polls.max(1) {
            if self.line.is_high()? {
                return Ok(true);
            }
            self.line.delay_us(self.timing.idle_poll_us);
        }
        Ok(false)
    }
}

impl<L> OneWireMaster<L> {
    /// Timing in use.
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Borrow the underlying line.
    pub fn line(&self) -> &L {
        &self.line
    }

    /// Mutably borrow the underlying line.
    pub fn line_mut(&mut self) -> &mut L {
        &mut self.line
    }

    /// Release the underlying line.
    pub fn into_line(self) -> L {
        self.line
    }
}

impl<L: Line> OneWire for OneWireMaster<L> {
    type BusError = L::Error;

    fn reset(&mut self) -> OneWireResult<bool, Self::BusError> {
        if !self.wait_idle()? {
            warn!("1-Wire line stuck low, no reset pulse sent");
            return Ok(false);
        }
        let Timing {
            reset_low_us,
            presence_sample_us,
            reset_settle_us,
            ..
        } = self.timing;
        let line = &mut self.line;
        critical_section::with(|_| line.drive_low())?;
        line.delay_us(reset_low_us);
        let present = critical_section::with(|_| -> Result<bool, L::Error> {
            line.release()?;
            line.delay_us(presence_sample_us);
            Ok(!line.is_high()?)
        })?;
        line.delay_us(reset_settle_us);
        trace!("1-Wire reset, presence: {present}");
        Ok(present)
    }

    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError> {
        let (low_us, high_us) = if bit {
            (self.timing.write_one_low_us, self.timing.write_one_high_us)
        } else {
            (self.timing.write_zero_low_us, self.timing.write_zero_high_us)
        };
        let line = &mut self.line;
        critical_section::with(|_| -> Result<(), L::Error> {
            line.drive_low()?;
            line.delay_us(low_us);
            line.release()
        })?;
        line.delay_us(high_us);
        Ok(())
    }

    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
        let sample_delay_us = self.sample_delay_us;
        let line = &mut self.line;
        let bit = critical_section::with(|_| -> Result<bool, L::Error> {
            line.drive_low()?;
            line.release()?;
            line.delay_us(sample_delay_us);
            line.is_high()
        })?;
        line.delay_us(self.timing.read_recovery_us);
        Ok(bit)
    }

    fn power(&mut self) -> OneWireResult<(), Self::BusError> {
        Ok(self.line.drive_high()?)
    }

    fn depower(&mut self) -> OneWireResult<(), Self::BusError> {
        Ok(self.line.release()?)
    }
}
