use core::fmt;

/// One wire communication error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneWireError<E> {
    /// Encapsulates the error type from the underlying line.
    Other(E),
    /// Indicates that no device answered the reset pulse. The bus is empty,
    /// shorted, or held low by a stuck device.
    NoDevicePresent,
    /// Both the id bit and its complement were read as 1 during a
    /// [search](crate::OneWireSearch::next) pass: no device is taking part anymore.
    BusCollision,
    /// Computed CRC of a ROM code or data block is invalid.
    InvalidCrc,
    /// The configured slot timing cannot work, e.g. a reset pulse too short
    /// for devices to recognize.
    InvalidTiming,
    /// The line releases slower than the configured read sample point, so
    /// bits cannot be read reliably on this hardware.
    Calibration {
        /// Measured drive-low to input transition latency.
        latency_us: u32,
        /// Configured sample point, measured from the falling edge.
        sample_point_us: u32,
    },
}

impl<E> From<E> for OneWireError<E> {
    fn from(other: E) -> Self {
        Self::Other(other)
    }
}

impl<E: fmt::Debug> fmt::Display for OneWireError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(e) => write!(f, "line error: {e:?}"),
            Self::NoDevicePresent => f.write_str("no presence pulse after reset"),
            Self::BusCollision => f.write_str("no device answered the search slot"),
            Self::InvalidCrc => f.write_str("CRC mismatch"),
            Self::InvalidTiming => f.write_str("slot timing outside the 1-Wire limits"),
            Self::Calibration {
                latency_us,
                sample_point_us,
            } => write!(
                f,
                "line transition latency of {latency_us} us does not fit before the {sample_point_us} us sample point"
            ),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for OneWireError<E> {}
