/*
 * Scratchpad Memory Access
 *
 * Every core owns a communication scratchpad that the network interface
 * can read from and write into at any time. From the point of view of the
 * running core, parts of that memory change without a local store, so
 * every access that may observe another core's DMA write must be volatile.
 *
 * Design:
 * - `SpmAddr` is a byte offset from the communication SPM base; this is the
 *   address space the NoC understands (after conversion to double words)
 * - `Spm` is a copyable handle on one scratchpad: base pointer + length
 * - `SpmCell` wraps a single cross-core visible word (flag or counter) and
 *   only offers volatile loads and stores
 * - Payload bytes are moved with volatile byte accesses, so the compiler
 *   cannot sink a payload store below the flag store that publishes it
 */

use core::fmt;
use core::ptr::NonNull;

use volatile::VolatilePtr;

/// Byte offset inside a communication scratchpad
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SpmAddr(u32);

impl SpmAddr {
    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Address `bytes` further into the scratchpad
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes as u32)
    }
}

impl fmt::Display for SpmAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SPM+{:#06x}", self.0)
    }
}

/// Handle on a communication scratchpad
///
/// The handle does not own the memory. Whoever creates it promises that the
/// memory stays mapped for as long as any copy of the handle is used.
#[derive(Clone, Copy)]
pub struct Spm {
    base: NonNull<u8>,
    len: usize,
}

impl Spm {
    /// Create a handle on `len` bytes of scratchpad starting at `base`
    ///
    /// Returns `None` if `base` is not double word aligned.
    ///
    /// # Safety
    /// - `base..base + len` must be valid for volatile reads and writes for
    ///   the whole lifetime of the handle and all of its copies
    /// - Nothing may hold a Rust reference into that memory
    pub unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Option<Self> {
        if (base.as_ptr() as usize) % crate::layout::DW_SIZE != 0 {
            return None;
        }
        Some(Self { base, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check whether `len` bytes at `addr` lie inside this scratchpad
    pub fn contains(&self, addr: SpmAddr, len: usize) -> bool {
        addr.as_usize()
            .checked_add(len)
            .is_some_and(|end| end <= self.len)
    }

    #[inline]
    fn ptr(&self, addr: SpmAddr, len: usize) -> *mut u8 {
        assert!(
            self.contains(addr, len),
            "scratchpad access out of bounds: {} + {} > {}",
            addr,
            len,
            self.len
        );
        // SAFETY: bounds checked above, base is valid per from_raw_parts
        unsafe { self.base.as_ptr().add(addr.as_usize()) }
    }

    /// Volatile accessor for the 32-bit word at `addr`
    ///
    /// # Panics
    /// If `addr` is not word aligned or outside the scratchpad.
    pub fn cell(&self, addr: SpmAddr) -> SpmCell<'_> {
        assert!(addr.as_usize() % 4 == 0, "unaligned scratchpad word {}", addr);
        let ptr = self.ptr(addr, 4).cast::<u32>();
        // SAFETY: in bounds, aligned and never null
        let ptr = unsafe { VolatilePtr::new(NonNull::new_unchecked(ptr)) };
        SpmCell { ptr }
    }

    /// Copy `dst.len()` bytes starting at `addr` out of the scratchpad
    pub fn read_bytes(&self, addr: SpmAddr, dst: &mut [u8]) {
        let src = self.ptr(addr, dst.len());
        for (i, byte) in dst.iter_mut().enumerate() {
            // SAFETY: src..src + dst.len() is in bounds
            *byte = unsafe { core::ptr::read_volatile(src.add(i)) };
        }
    }

    /// Copy `src` into the scratchpad starting at `addr`
    pub fn write_bytes(&self, addr: SpmAddr, src: &[u8]) {
        let dst = self.ptr(addr, src.len());
        for (i, byte) in src.iter().enumerate() {
            // SAFETY: dst..dst + src.len() is in bounds
            unsafe { core::ptr::write_volatile(dst.add(i), *byte) };
        }
    }

    /// Set `len` bytes starting at `addr` to `value`
    pub fn fill(&self, addr: SpmAddr, len: usize, value: u8) {
        let dst = self.ptr(addr, len);
        for i in 0..len {
            // SAFETY: dst..dst + len is in bounds
            unsafe { core::ptr::write_volatile(dst.add(i), value) };
        }
    }
}

impl fmt::Debug for Spm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spm")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

/// A word of scratchpad memory that another core may change at any time.
///
/// Each `load` goes to memory; nothing is cached in a register and the
/// compiler may not reorder it against other volatile accesses.
#[derive(Clone, Copy)]
pub struct SpmCell<'a> {
    ptr: VolatilePtr<'a, u32>,
}

impl SpmCell<'_> {
    #[inline]
    pub fn load(&self) -> u32 {
        self.ptr.read()
    }

    #[inline]
    pub fn store(&self, value: u32) {
        self.ptr.write(value)
    }
}
