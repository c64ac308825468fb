/*
 * Scratchpad Layout of Message Passing Channels
 *
 * It is up to the programmer to allocate buffering space in the
 * communication scratchpads. This module holds the arithmetic that tells
 * how much space a channel end occupies and where its pieces live.
 *
 * Sender side:
 *       2 * (buf_size + FLAG_SIZE) + sizeof(recv_count)       (DW aligned)
 *
 *       +-----------------+------+-----------------+------+------------+
 *       | write buffer 0  | flag | write buffer 1  | flag | recv_count |
 *       +-----------------+------+-----------------+------+------------+
 *
 * Receiver side:
 *       num_buf * (buf_size + FLAG_SIZE) + sizeof(remote_recv_count)
 *                                                             (DW aligned)
 *
 *       +--------+------+--------+------+-----+--------+------+------------+
 *       | slot 0 | flag | slot 1 | flag | ... | slot n | flag | recv_count |
 *       +--------+------+--------+------+-----+--------+------+------------+
 *
 * Both ends must agree on buf_size and num_buf; the footprints below are
 * the only definition of the layout and are used by initialization and by
 * every size query.
 */

use core::mem::size_of;

use crate::mp::MpError;
use crate::spm::SpmAddr;

/// Size of a double word in bytes
pub const DW_SIZE: usize = 8;

/// Align `x` up to the next double word boundary
#[inline]
pub const fn dw_align(x: usize) -> usize {
    (x + DW_SIZE - 1) & !(DW_SIZE - 1)
}

/// Check whether `x` is a multiple of the double word size
#[inline]
pub const fn is_dw_aligned(x: usize) -> bool {
    x & (DW_SIZE - 1) == 0
}

/// Size of the flag placed after every payload.
///
/// The flag is the last thing a transfer writes, so seeing it valid means
/// the whole payload in front of it has arrived.
pub const FLAG_SIZE: usize = dw_align(8);

/// Flag value of a slot holding a complete message
pub const FLAG_VALID: u32 = 0xFFFF_FFFF;

/// Flag value of an empty or consumed slot
pub const FLAG_INVALID: u32 = 0x0000_0000;

/// Number of staging buffers at the sender.
///
/// DO NOT CHANGE! The role swap of the double buffer assumes exactly two.
pub const NUM_WRITE_BUF: usize = 2;

/// Size of the message counter shared between the two ends
pub const COUNT_SIZE: usize = size_of::<u32>();

/// Width of the double-word pointers understood by the network interface
pub const NOC_PTR_WIDTH: u32 = 14;

/// Number of scratchpad bytes reachable through a NoC pointer
pub const SPM_ADDRESSABLE: usize = (1 << NOC_PTR_WIDTH) * DW_SIZE;

/// Bytes occupied by one payload plus its trailing flag
#[inline]
pub const fn slot_size(buf_size: usize) -> usize {
    dw_align(buf_size) + FLAG_SIZE
}

/// Scratchpad bytes needed by the sending end of a channel
pub const fn send_footprint(buf_size: usize) -> usize {
    dw_align(NUM_WRITE_BUF * slot_size(buf_size) + COUNT_SIZE)
}

/// Scratchpad bytes needed by the receiving end of a channel
pub const fn recv_footprint(buf_size: usize, num_buf: usize) -> usize {
    dw_align(num_buf * slot_size(buf_size) + COUNT_SIZE)
}

/// Validate the geometry of a channel before any footprint is computed.
///
/// Keeps the footprint arithmetic clear of overflow for absurd inputs.
pub(crate) fn check_geometry(buf_size: usize, num_buf: usize) -> Result<(), MpError> {
    if buf_size == 0 {
        return Err(MpError::ZeroSize);
    }
    if num_buf == 0 {
        return Err(MpError::ZeroBuffers);
    }
    if buf_size > SPM_ADDRESSABLE || num_buf > SPM_ADDRESSABLE / FLAG_SIZE {
        return Err(MpError::TooLarge { buf_size, num_buf });
    }
    Ok(())
}

/// Validate that `len` bytes at `addr` are double word aligned and reachable
/// by the NoC.
pub(crate) fn check_region(addr: SpmAddr, len: usize) -> Result<(), MpError> {
    if !is_dw_aligned(addr.as_usize()) {
        return Err(MpError::Misaligned { addr });
    }
    match addr.as_usize().checked_add(len) {
        Some(end) if end <= SPM_ADDRESSABLE => Ok(()),
        _ => Err(MpError::OutOfRange { addr, len }),
    }
}

/// Bump allocator for channel structures in one scratchpad.
///
/// Hands out double word aligned, non-overlapping regions so that several
/// channels can share a scratchpad without the programmer adding up
/// footprints by hand. There is no free; channels live forever.
#[derive(Debug, Clone)]
pub struct SpmLayout {
    next: usize,
    end: usize,
}

impl SpmLayout {
    /// Create an allocator for `len` bytes starting at `base`
    ///
    /// # Arguments
    /// * `base` - First usable scratchpad address, double word aligned
    /// * `len` - Number of bytes available from `base`
    pub fn new(base: SpmAddr, len: usize) -> Result<Self, MpError> {
        check_region(base, len)?;
        Ok(Self {
            next: base.as_usize(),
            end: base.as_usize() + len,
        })
    }

    /// Double word rounded size of a `bytes` reservation, if it fits
    fn rounded(&self, bytes: usize) -> Option<usize> {
        let size = bytes.checked_add(DW_SIZE - 1)? & !(DW_SIZE - 1);
        (size <= self.remaining()).then_some(size)
    }

    /// Check whether `bytes` could be reserved without reserving them
    pub fn fits(&self, bytes: usize) -> bool {
        self.rounded(bytes).is_some()
    }

    /// Reserve `bytes` (rounded up to double words)
    pub fn alloc(&mut self, bytes: usize) -> Result<SpmAddr, MpError> {
        let size = self.rounded(bytes).ok_or(MpError::OutOfSpace)?;
        let addr = SpmAddr::new(self.next as u32);
        self.next += size;
        log::trace!("spm layout: reserved {} bytes at {}", size, addr);
        Ok(addr)
    }

    /// Reserve the structure of a sending channel end
    pub fn alloc_send(&mut self, buf_size: usize) -> Result<SpmAddr, MpError> {
        check_geometry(buf_size, 1)?;
        self.alloc(send_footprint(buf_size))
    }

    /// Reserve the structure of a receiving channel end
    pub fn alloc_recv(&mut self, buf_size: usize, num_buf: usize) -> Result<SpmAddr, MpError> {
        check_geometry(buf_size, num_buf)?;
        self.alloc(recv_footprint(buf_size, num_buf))
    }

    /// Bytes still available
    pub fn remaining(&self) -> usize {
        self.end - self.next
    }
}
