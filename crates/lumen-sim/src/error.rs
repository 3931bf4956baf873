//! Contract-violation reporting for the simulated platform.

use thiserror::Error;

/// A HAL contract violation recorded by a simulated device.
///
/// The firmware under test cannot observe these; they accumulate inside
/// the simulated devices and tests assert on them after the fact. Any
/// violation means the core drove the hardware in a way the real part
/// would corrupt data over.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// Flash access outside the simulated region.
    #[error("flash access outside the simulated region: addr {addr:#x}, len {len}")]
    FlashOutOfRange {
        /// First byte of the access.
        addr: u32,
        /// Length of the access.
        len: usize,
    },

    /// Erase address not aligned to a sector boundary.
    #[error("erase address {addr:#x} is not sector-aligned")]
    MisalignedErase {
        /// The offending address.
        addr: u32,
    },

    /// A program operation tried to flip a bit from 0 to 1 without an
    /// erase. NOR flash cannot do that; the write would silently corrupt.
    #[error("write at {addr:#x} attempts a 0->1 bit transition without erase")]
    BitSetWithoutErase {
        /// Address of the first offending byte.
        addr: u32,
    },

    /// A radio frame exceeded the mesh MTU.
    #[error("radio frame of {len} bytes exceeds the {max}-byte mesh MTU")]
    FrameTooLarge {
        /// Frame length.
        len: usize,
        /// The MTU.
        max: usize,
    },
}
