/*
 * Network-on-Chip Transport Contract
 *
 * The message passing layer needs exactly two things from the NoC:
 * - start a DMA transfer from the local scratchpad into the scratchpad of
 *   another core, without blocking, failing if no DMA engine is free
 * - ask whether the transfers towards a core have completed
 *
 * Addresses and sizes at this boundary are in double words relative to the
 * communication SPM base, as the network interface expects them. The
 * conversion from byte offsets lives here so both sides of a channel use
 * the same arithmetic.
 *
 * Ordering contract: transfers from one core to the same destination core
 * complete in issue order, and the bytes of one transfer land in ascending
 * address order. Nothing is assumed across different destinations.
 */

pub mod sim;

use core::fmt;

use crate::layout::{DW_SIZE, NOC_PTR_WIDTH, is_dw_aligned};
use crate::spm::SpmAddr;

pub use sim::{Delivery, NocConfig, NocConfigError, SimNoc, SimPort};

/// Identity of a core on the NoC; also selects the DMA engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreId(pub usize);

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Core({})", self.0)
    }
}

/// Scratchpad address in double words, as carried by NoC packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DwAddr(pub u16);

impl DwAddr {
    /// Largest pointer the network interface can express
    pub const MAX: u16 = (1 << NOC_PTR_WIDTH) - 1;

    /// Convert a byte offset; `None` if misaligned or not reachable
    pub fn from_spm(addr: SpmAddr) -> Option<Self> {
        if !is_dw_aligned(addr.as_usize()) {
            return None;
        }
        let dw = addr.as_usize() / DW_SIZE;
        if dw > Self::MAX as usize {
            return None;
        }
        Some(Self(dw as u16))
    }

    pub fn to_spm(self) -> SpmAddr {
        SpmAddr::new(self.0 as u32 * DW_SIZE as u32)
    }
}

/// Number of double words covering `bytes`
pub fn dw_len(bytes: usize) -> u16 {
    bytes.div_ceil(DW_SIZE) as u16
}

/// Transport conditions reported by a DMA request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NocError {
    /// Every DMA engine towards the destination is in use
    Busy,
}

impl fmt::Display for NocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NocError::Busy => write!(f, "DMA engine busy"),
        }
    }
}

/// Point-to-point DMA transport seen from one core
pub trait Noc {
    /// Start a transfer of `size` double words from `read_ptr` in the local
    /// scratchpad to `write_ptr` in the scratchpad of `dest`.
    ///
    /// Never blocks. Returns `Err(NocError::Busy)` if no DMA engine is free.
    fn dma(&self, dest: CoreId, write_ptr: DwAddr, read_ptr: DwAddr, size: u16)
    -> Result<(), NocError>;

    /// Check whether all transfers towards `dest` have finished
    fn done(&self, dest: CoreId) -> bool;
}

impl<T: Noc + ?Sized> Noc for &T {
    fn dma(&self, dest: CoreId, write_ptr: DwAddr, read_ptr: DwAddr, size: u16)
    -> Result<(), NocError> {
        (**self).dma(dest, write_ptr, read_ptr, size)
    }

    fn done(&self, dest: CoreId) -> bool {
        (**self).done(dest)
    }
}
