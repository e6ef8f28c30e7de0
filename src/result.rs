use core::fmt::Debug;

/// Error type
#[derive(Debug, PartialEq)]
pub enum Error<E: Sized + Debug> {
    /// Wire did not return high after being released
    WireFault,
    /// Bus handle was not initialized, or its last initialization failed
    NotConfigured,
    /// No presence on wire
    NoPresence,
    /// Both the id bit and its complement read high during a search at this bit position
    BusFault(u8),
    /// Computed and received CRC
    CrcMismatch(u8, u8),
    /// Output buffer cannot even hold the end-of-list sentinel
    BufferTooSmall,
    /// Pin error passed through from the wire
    PortError(E),
}

impl<E: Sized + Debug> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Error::PortError(e)
    }
}
