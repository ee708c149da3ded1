/// A single open-drain 1-Wire line with a pull-up, as supplied by the platform.
///
/// The bus master only ever pulls the line low or lets it float; devices
/// answer by pulling low during a time slot. Implementations must make each
/// call as short as the hardware allows, since the slot timing is built from
/// [`delay_us`](Line::delay_us) around them.
pub trait Line {
    /// Error returned by the pin operations.
    type Error;

    /// Pull the line low.
    fn drive_low(&mut self) -> Result<(), Self::Error>;

    /// Stop driving the line and let the pull-up take it high.
    fn release(&mut self) -> Result<(), Self::Error>;

    /// Actively drive the line high to power parasitic devices.
    ///
    /// Lines that cannot source current leave the bus to the pull-up.
    fn drive_high(&mut self) -> Result<(), Self::Error> {
        self.release()
    }

    /// Sample the line level.
    fn is_high(&mut self) -> Result<bool, Self::Error>;

    /// Block for at least `us` microseconds.
    fn delay_us(&mut self, us: u32);

    /// Time between [`release`](Line::release) being requested and the line
    /// being sampled as input, in microseconds.
    ///
    /// Queried once when the bus master is built, and checked against the
    /// read sample point.
    fn release_latency_us(&mut self) -> Result<u32, Self::Error>;
}

impl<T: Line + ?Sized> Line for &mut T {
    type Error = T::Error;

    fn drive_low(&mut self) -> Result<(), Self::Error> {
        T::drive_low(self)
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        T::release(self)
    }

    fn drive_high(&mut self) -> Result<(), Self::Error> {
        T::drive_high(self)
    }

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        T::is_high(self)
    }

    fn delay_us(&mut self, us: u32) {
        T::delay_us(self, us)
    }

    fn release_latency_us(&mut self) -> Result<u32, Self::Error> {
        T::release_latency_us(self)
    }
}

/// Standard-speed 1-Wire slot timings, in microseconds.
///
/// The defaults follow the standard speed timing of the Maxim 1-Wire devices.
/// The read sample point is the value that usually needs adjusting, because
/// the output-to-input turnaround of a GPIO differs between controllers.
///
/// The bus master checks the reset pulse length and the sample point when it
/// is built. Keeping the other slot times within the device datasheet limits
/// is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Reset pulse low time. At least 480.
    pub reset_low_us: u32,
    /// Delay from releasing the reset pulse to sampling for presence.
    pub presence_sample_us: u32,
    /// Wait after the presence sample until the reset slot is over.
    pub reset_settle_us: u32,
    /// Low time of a write-one slot.
    pub write_one_low_us: u32,
    /// High time after a write-one low pulse.
    pub write_one_high_us: u32,
    /// Low time of a write-zero slot.
    pub write_zero_low_us: u32,
    /// Recovery time after a write-zero low pulse.
    pub write_zero_high_us: u32,
    /// Read sample point, measured from the falling edge of the read slot.
    pub sample_point_us: u32,
    /// Wait after sampling until the read slot is over.
    pub read_recovery_us: u32,
    /// Number of polls for the line to float high before a reset. At least
    /// one poll is made.
    pub idle_polls: u32,
    /// Delay between two idle polls.
    pub idle_poll_us: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            reset_low_us: 500,
            presence_sample_us: 90,
            reset_settle_us: 420,
            write_one_low_us: 1,
            write_one_high_us: 60,
            write_zero_low_us: 60,
            write_zero_high_us: 1,
            sample_point_us: 13,
            read_recovery_us: 55,
            idle_polls: 125,
            idle_poll_us: 2,
        }
    }
}

impl Timing {
    /// Set the read sample point.
    pub fn with_sample_point_us(mut self, us: u32) -> Self {
        self.sample_point_us = us;
        self
    }

    /// Set the reset pulse low time.
    pub fn with_reset_low_us(mut self, us: u32) -> Self {
        self.reset_low_us = us;
        self
    }

    /// Set the presence sample delay after the reset pulse.
    pub fn with_presence_sample_us(mut self, us: u32) -> Self {
        self.presence_sample_us = us;
        self
    }

    /// Set the settle time after the presence sample.
    pub fn with_reset_settle_us(mut self, us: u32) -> Self {
        self.reset_settle_us = us;
        self
    }

    /// Set the low and high times of a write-one slot.
    pub fn with_write_one_us(mut self, low: u32, high: u32) -> Self {
        self.write_one_low_us = low;
        self.write_one_high_us = high;
        self
    }

    /// Set the low and high times of a write-zero slot.
    pub fn with_write_zero_us(mut self, low: u32, high: u32) -> Self {
        self.write_zero_low_us = low;
        self.write_zero_high_us = high;
        self
    }

    /// Set the wait after sampling a read slot.
    pub fn with_read_recovery_us(mut self, us: u32) -> Self {
        self.read_recovery_us = us;
        self
    }

    /// Set how long to wait for an idle bus before a reset.
    pub fn with_idle_wait(mut self, polls: u32, poll_us: u32) -> Self {
        self.idle_polls = polls;
        self.idle_poll_us = poll_us;
        self
    }
}
