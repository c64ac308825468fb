/*
 * Simulated Network-on-Chip
 *
 * A software model of the T-CREST NoC, good enough to run the message
 * passing protocol on a host: one communication scratchpad per core and
 * one DMA link per (source, destination) pair.
 *
 * Design:
 * - Each link queues up to `dma_depth` outstanding transfers; a request on
 *   a full link fails with `NocError::Busy` (depth 1 mirrors the hardware,
 *   which has one DMA entry per destination)
 * - Transfers copy their source bytes when they complete, not when they are
 *   issued, so overwriting a source buffer early is visible as corruption
 * - Links complete in FIFO order and copy in ascending addresses, which is
 *   the ordering contract the trailing flag relies on
 * - Time only advances when asked: `tick()` completes the head transfer of
 *   every link, `deliver()` one link, `deliver_all()` everything.
 *   `Delivery::Immediate` completes every transfer as it is issued.
 *
 * The scratchpads are reachable through raw `Spm` handles only, so the
 * fabric is neither `Send` nor `Sync`: all simulated cores are stepped from
 * one thread.
 */

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::ptr::NonNull;

use heapless::Deque;
use spin::Mutex;

use super::{CoreId, DwAddr, Noc, NocError};
use crate::layout::{DW_SIZE, SPM_ADDRESSABLE, is_dw_aligned};
use crate::spm::Spm;

/// Upper bound for the number of outstanding transfers on one link
pub const MAX_DMA_DEPTH: usize = 8;

/// When issued transfers take effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Transfers wait until `tick`, `deliver` or `deliver_all`
    Manual,
    /// Transfers complete inside the `dma` call
    Immediate,
}

/// Configuration of the simulated fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NocConfig {
    /// Number of cores on the platform
    pub cores: usize,
    /// Bytes of communication scratchpad per core
    pub spm_size: usize,
    /// Outstanding transfers per (source, destination) link
    pub dma_depth: usize,
    pub delivery: Delivery,
}

impl Default for NocConfig {
    fn default() -> Self {
        Self {
            cores: 4,
            spm_size: 16 * 1024,
            dma_depth: 1,
            delivery: Delivery::Manual,
        }
    }
}

impl NocConfig {
    pub fn validate(&self) -> Result<(), NocConfigError> {
        if self.cores == 0 {
            return Err(NocConfigError::NoCores);
        }
        if self.spm_size == 0 || self.spm_size > SPM_ADDRESSABLE || !is_dw_aligned(self.spm_size) {
            return Err(NocConfigError::SpmSize(self.spm_size));
        }
        if self.dma_depth == 0 || self.dma_depth > MAX_DMA_DEPTH {
            return Err(NocConfigError::DmaDepth(self.dma_depth));
        }
        Ok(())
    }
}

/// Rejected fabric configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NocConfigError {
    NoCores,
    /// Zero, not double word aligned, or beyond the NoC pointer range
    SpmSize(usize),
    /// Zero or above `MAX_DMA_DEPTH`
    DmaDepth(usize),
}

impl fmt::Display for NocConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NocConfigError::NoCores => write!(f, "No cores configured"),
            NocConfigError::SpmSize(size) => write!(f, "Invalid scratchpad size {}", size),
            NocConfigError::DmaDepth(depth) => {
                write!(f, "DMA depth {} not in 1..={}", depth, MAX_DMA_DEPTH)
            }
        }
    }
}

/// One outstanding DMA transfer
#[derive(Debug, Clone, Copy)]
struct Transfer {
    write_ptr: DwAddr,
    read_ptr: DwAddr,
    size: u16,
}

/// Scratchpad storage of one core, only ever touched through `Spm`
struct Memory {
    ptr: NonNull<u64>,
    words: usize,
}

impl Memory {
    fn new(bytes: usize) -> Self {
        let words = bytes / DW_SIZE;
        let boxed: Box<[u64]> = vec![0u64; words].into_boxed_slice();
        let ptr = Box::into_raw(boxed).cast::<u64>();
        Self {
            // SAFETY: Box::into_raw never returns null
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            words,
        }
    }

    fn spm(&self) -> Spm {
        // SAFETY: the allocation is u64 aligned and lives as long as the
        // fabric; no reference into it is ever created
        unsafe { Spm::from_raw_parts(self.ptr.cast::<u8>(), self.words * DW_SIZE) }
            .unwrap_or_else(|| unreachable!("u64 storage is double word aligned"))
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        let slice = core::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.words);
        // SAFETY: created by Box::into_raw in Memory::new with the same length
        drop(unsafe { Box::from_raw(slice) });
    }
}

/// Link queues, indexed by `src * cores + dst`
struct Fabric {
    links: Vec<Deque<Transfer, MAX_DMA_DEPTH>>,
}

/// Software NoC connecting `config.cores` scratchpads
pub struct SimNoc {
    config: NocConfig,
    memories: Vec<Memory>,
    fabric: Mutex<Fabric>,
}

impl SimNoc {
    /// Create a fabric with zeroed scratchpads and idle links
    pub fn new(config: NocConfig) -> Result<Self, NocConfigError> {
        config.validate()?;

        let memories = (0..config.cores).map(|_| Memory::new(config.spm_size)).collect();
        let links = (0..config.cores * config.cores).map(|_| Deque::new()).collect();

        log::debug!(
            "SimNoc: {} cores, {} bytes SPM each, DMA depth {}, {:?} delivery",
            config.cores,
            config.spm_size,
            config.dma_depth,
            config.delivery
        );

        Ok(Self {
            config,
            memories,
            fabric: Mutex::new(Fabric { links }),
        })
    }

    pub fn config(&self) -> &NocConfig {
        &self.config
    }

    fn check_core(&self, core: CoreId) {
        assert!(core.0 < self.config.cores, "{} does not exist", core);
    }

    fn link(&self, src: CoreId, dst: CoreId) -> usize {
        self.check_core(src);
        self.check_core(dst);
        src.0 * self.config.cores + dst.0
    }

    /// Communication scratchpad of `core`
    pub fn spm(&self, core: CoreId) -> Spm {
        self.check_core(core);
        self.memories[core.0].spm()
    }

    /// Transport endpoint of `core`
    pub fn port(&self, core: CoreId) -> SimPort<'_> {
        self.check_core(core);
        SimPort { noc: self, core }
    }

    /// Number of transfers from `src` to `dst` not yet completed
    pub fn pending(&self, src: CoreId, dst: CoreId) -> usize {
        let link = self.link(src, dst);
        self.fabric.lock().links[link].len()
    }

    /// Complete the oldest transfer from `src` to `dst`
    ///
    /// Returns false if the link was idle.
    pub fn deliver(&self, src: CoreId, dst: CoreId) -> bool {
        let link = self.link(src, dst);
        let transfer = self.fabric.lock().links[link].pop_front();
        match transfer {
            Some(transfer) => {
                self.complete(src, dst, &transfer);
                true
            }
            None => false,
        }
    }

    /// Advance time by one step: every busy link completes one transfer
    ///
    /// Returns the number of completed transfers.
    pub fn tick(&self) -> usize {
        let cores = self.config.cores;
        let mut completed = 0;
        for src in 0..cores {
            for dst in 0..cores {
                if self.deliver(CoreId(src), CoreId(dst)) {
                    completed += 1;
                }
            }
        }
        completed
    }

    /// Complete every outstanding transfer, link by link in FIFO order
    pub fn deliver_all(&self) -> usize {
        let mut completed = 0;
        loop {
            let step = self.tick();
            if step == 0 {
                return completed;
            }
            completed += step;
        }
    }

    fn start(&self, src: CoreId, dst: CoreId, transfer: Transfer) -> Result<(), NocError> {
        let bytes = transfer.size as usize * DW_SIZE;
        assert!(
            self.spm(src).contains(transfer.read_ptr.to_spm(), bytes)
                && self.spm(dst).contains(transfer.write_ptr.to_spm(), bytes),
            "DMA {} -> {} outside scratchpad",
            src,
            dst
        );

        let link = self.link(src, dst);
        {
            let mut fabric = self.fabric.lock();
            let queue = &mut fabric.links[link];
            if queue.len() >= self.config.dma_depth {
                return Err(NocError::Busy);
            }
            if self.config.delivery == Delivery::Manual {
                // Depth is at most MAX_DMA_DEPTH, the push cannot fail
                let _ = queue.push_back(transfer);
            }
        }

        log::trace!(
            "dma {} -> {}: {} dw from {:?} to {:?}",
            src,
            dst,
            transfer.size,
            transfer.read_ptr,
            transfer.write_ptr
        );

        if self.config.delivery == Delivery::Immediate {
            self.complete(src, dst, &transfer);
        }
        Ok(())
    }

    fn complete(&self, src: CoreId, dst: CoreId, transfer: &Transfer) {
        let from = self.spm(src);
        let to = self.spm(dst);
        let mut word = [0u8; DW_SIZE];
        for i in 0..transfer.size as usize {
            from.read_bytes(transfer.read_ptr.to_spm().offset(i * DW_SIZE), &mut word);
            to.write_bytes(transfer.write_ptr.to_spm().offset(i * DW_SIZE), &word);
        }
    }
}

/// A core's view of the simulated NoC
#[derive(Clone, Copy)]
pub struct SimPort<'a> {
    noc: &'a SimNoc,
    core: CoreId,
}

impl SimPort<'_> {
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Communication scratchpad of this core
    pub fn spm(&self) -> Spm {
        self.noc.spm(self.core)
    }
}

impl Noc for SimPort<'_> {
    fn dma(&self, dest: CoreId, write_ptr: DwAddr, read_ptr: DwAddr, size: u16)
    -> Result<(), NocError> {
        self.noc.start(self.core, dest, Transfer { write_ptr, read_ptr, size })
    }

    fn done(&self, dest: CoreId) -> bool {
        self.noc.pending(self.core, dest) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spm::SpmAddr;

    fn manual(depth: usize) -> SimNoc {
        SimNoc::new(NocConfig {
            cores: 2,
            spm_size: 1024,
            dma_depth: depth,
            delivery: Delivery::Manual,
        })
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(NocConfig::default().validate().is_ok());
        let bad = NocConfig { cores: 0, ..NocConfig::default() };
        assert_eq!(bad.validate(), Err(NocConfigError::NoCores));
        let bad = NocConfig { spm_size: 12, ..NocConfig::default() };
        assert_eq!(bad.validate(), Err(NocConfigError::SpmSize(12)));
        let bad = NocConfig { dma_depth: MAX_DMA_DEPTH + 1, ..NocConfig::default() };
        assert!(SimNoc::new(bad).is_err());
    }

    #[test]
    fn test_transfer_lands_on_delivery() {
        let noc = manual(1);
        let a = CoreId(0);
        let b = CoreId(1);
        noc.spm(a).write_bytes(SpmAddr::new(0), b"abcdefgh");

        let port = noc.port(a);
        port.dma(b, DwAddr(4), DwAddr(0), 1).unwrap();
        assert!(!port.done(b));

        let mut out = [0u8; 8];
        noc.spm(b).read_bytes(SpmAddr::new(32), &mut out);
        assert_eq!(out, [0; 8]);

        assert!(noc.deliver(a, b));
        assert!(port.done(b));
        noc.spm(b).read_bytes(SpmAddr::new(32), &mut out);
        assert_eq!(&out, b"abcdefgh");
    }

    #[test]
    fn test_busy_link() {
        let noc = manual(2);
        let port = noc.port(CoreId(0));
        assert!(port.dma(CoreId(1), DwAddr(0), DwAddr(0), 1).is_ok());
        assert!(port.dma(CoreId(1), DwAddr(1), DwAddr(1), 1).is_ok());
        assert_eq!(port.dma(CoreId(1), DwAddr(2), DwAddr(2), 1), Err(NocError::Busy));

        // other links are independent
        assert!(port.dma(CoreId(0), DwAddr(8), DwAddr(0), 1).is_ok());

        assert_eq!(noc.tick(), 2);
        assert_eq!(noc.pending(CoreId(0), CoreId(1)), 1);
        assert_eq!(noc.deliver_all(), 1);
        assert!(port.done(CoreId(1)));
    }

    #[test]
    fn test_source_read_at_completion() {
        let noc = manual(1);
        let a = CoreId(0);
        let b = CoreId(1);
        noc.spm(a).write_bytes(SpmAddr::new(0), b"old data");
        noc.port(a).dma(b, DwAddr(0), DwAddr(0), 1).unwrap();
        noc.spm(a).write_bytes(SpmAddr::new(0), b"new data");
        noc.deliver_all();

        let mut out = [0u8; 8];
        noc.spm(b).read_bytes(SpmAddr::new(0), &mut out);
        assert_eq!(&out, b"new data");
    }

    #[test]
    fn test_fifo_per_link() {
        let noc = manual(2);
        let a = CoreId(0);
        let b = CoreId(1);
        noc.spm(a).write_bytes(SpmAddr::new(0), b"first...");
        noc.spm(a).write_bytes(SpmAddr::new(8), b"second..");
        let port = noc.port(a);
        port.dma(b, DwAddr(0), DwAddr(0), 1).unwrap();
        port.dma(b, DwAddr(0), DwAddr(1), 1).unwrap();

        let mut out = [0u8; 8];
        noc.deliver(a, b);
        noc.spm(b).read_bytes(SpmAddr::new(0), &mut out);
        assert_eq!(&out, b"first...");
        noc.deliver(a, b);
        noc.spm(b).read_bytes(SpmAddr::new(0), &mut out);
        assert_eq!(&out, b"second..");
    }

    #[test]
    fn test_immediate_delivery() {
        let noc = SimNoc::new(NocConfig {
            cores: 2,
            spm_size: 256,
            dma_depth: 1,
            delivery: Delivery::Immediate,
        })
        .unwrap();
        noc.spm(CoreId(1)).cell(SpmAddr::new(16)).store(7);
        noc.port(CoreId(1)).dma(CoreId(0), DwAddr(2), DwAddr(2), 1).unwrap();
        assert!(noc.port(CoreId(1)).done(CoreId(0)));
        assert_eq!(noc.spm(CoreId(0)).cell(SpmAddr::new(16)).load(), 7);
    }

    #[test]
    #[should_panic]
    fn test_unknown_core() {
        let noc = manual(1);
        noc.spm(CoreId(5));
    }
}
