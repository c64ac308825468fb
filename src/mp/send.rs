/*
 * Sending End of a Channel
 *
 * The sender owns two staging buffers in its scratchpad. The application
 * writes the next payload into the active one while the shadow one may
 * still be the source of the previous DMA transfer. Sending marks the
 * payload's flag valid, starts the DMA into the receiver's next ring slot
 * and swaps the roles of the two buffers.
 *
 * A buffer that sourced a transfer is handed back to the application only
 * after the NoC reports the transfers towards the receiver as done; before
 * that, new payload bytes could leak into the transfer in flight.
 */

use core::fmt;

use super::{Common, Geometry, MpError, TrySendError, dw, spin_until};
use crate::layout::{FLAG_VALID, NUM_WRITE_BUF, send_footprint, recv_footprint, slot_size};
use crate::noc::{CoreId, Noc};
use crate::spm::{Spm, SpmAddr};

/// Role of a staging buffer in the double buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Exposed to the application for the next payload
    Active,
    /// Source of the most recent transfer
    Shadow,
}

#[derive(Debug, Clone, Copy)]
struct Staging {
    addr: SpmAddr,
    /// Sourced a transfer whose completion has not been observed
    in_flight: bool,
}

/// Exactly two staging buffers, swapped after every send
#[derive(Debug, Clone, Copy)]
struct DoubleBuffer {
    active: Staging,
    shadow: Staging,
}

impl DoubleBuffer {
    fn new(first: SpmAddr, second: SpmAddr) -> Self {
        Self {
            active: Staging { addr: first, in_flight: false },
            shadow: Staging { addr: second, in_flight: false },
        }
    }

    fn get(&self, role: Role) -> &Staging {
        match role {
            Role::Active => &self.active,
            Role::Shadow => &self.shadow,
        }
    }

    fn swap(&mut self) {
        core::mem::swap(&mut self.active, &mut self.shadow);
    }

    fn busy(&self) -> bool {
        self.active.in_flight || self.shadow.in_flight
    }

    fn settle(&mut self) {
        self.active.in_flight = false;
        self.shadow.in_flight = false;
    }
}

/// Sending end of a channel
pub struct Sender<N: Noc> {
    common: Common,
    noc: N,
    /// Core id of the receiver
    recv_id: CoreId,
    /// Number of messages sent
    send_count: u32,
    /// Tail of the receiver's queue
    send_ptr: usize,
    bufs: DoubleBuffer,
}

impl<N: Noc> Sender<N> {
    /// Initialize the sending end of a channel
    ///
    /// The local structure is laid out as two staging buffers followed by
    /// the acknowledgment counter; the counter is reset to zero.
    ///
    /// # Arguments
    /// * `noc` - Transport of the local core
    /// * `spm` - Communication scratchpad of the local core
    /// * `recv_id` - Core id of the receiving processor
    /// * `remote_addr` - Start of the receive structure in the receiver's SPM
    /// * `local_addr` - Start of the send structure in the local SPM
    /// * `buf_size` - Payload bytes per message (rounded up to double words)
    /// * `num_buf` - Number of slots at the receiver
    ///
    /// # Returns
    /// The descriptor, or `MpError::Misaligned` if either address is not
    /// double word aligned, or another `MpError` for an impossible geometry.
    ///
    /// The remote structure is only checked against the NoC pointer range;
    /// the receiver's scratchpad size is not known here. A remote region
    /// beyond it faults on the first transfer (`SimNoc` panics).
    pub fn new(
        noc: N,
        spm: Spm,
        recv_id: CoreId,
        remote_addr: SpmAddr,
        local_addr: SpmAddr,
        buf_size: usize,
        num_buf: usize,
    ) -> Result<Self, MpError> {
        let geo = Geometry::new(buf_size, num_buf)?;
        geo.check(
            &spm,
            (local_addr, send_footprint(geo.buf_size)),
            (remote_addr, recv_footprint(geo.buf_size, geo.num_buf)),
        )?;

        let slot = slot_size(geo.buf_size);
        let common = Common {
            spm,
            remote_addr,
            local_addr,
            buf_size: geo.buf_size,
            num_buf: geo.num_buf,
            recv_count: local_addr.offset(NUM_WRITE_BUF * slot),
        };
        spm.cell(common.recv_count).store(0);

        log::debug!(
            "mp: send channel to {} initialized, local {} remote {}, {} x {} bytes",
            recv_id,
            local_addr,
            remote_addr,
            geo.num_buf,
            geo.buf_size
        );

        Ok(Self {
            common,
            noc,
            recv_id,
            send_count: 0,
            send_ptr: 0,
            bufs: DoubleBuffer::new(local_addr, local_addr.offset(slot)),
        })
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn recv_id(&self) -> CoreId {
        self.recv_id
    }

    /// Number of messages sent so far (wrapping)
    pub fn send_count(&self) -> u32 {
        self.send_count
    }

    /// Slot index the next message goes to
    pub fn send_ptr(&self) -> usize {
        self.send_ptr
    }

    /// Messages the sender believes occupy receiver slots
    ///
    /// Based on the last acknowledgment count that arrived, so it may
    /// overestimate but never underestimate, as long as the receiver does
    /// not acknowledge more messages than it received. A count ahead of
    /// `send_count` wraps to a huge value and the channel never has
    /// capacity again.
    pub fn in_flight(&self) -> usize {
        self.send_count.wrapping_sub(self.common.recv_count()) as usize
    }

    /// Bytes this end occupies in the local scratchpad
    pub fn alloc_size(&self) -> usize {
        send_footprint(self.common.buf_size)
    }

    /// Local address of a staging buffer
    pub fn buf_addr(&self, role: Role) -> SpmAddr {
        self.bufs.get(role).addr
    }

    /// Forget in-flight marks once the NoC reports the transfers done
    fn poll_transfers(&mut self) {
        if self.bufs.busy() && self.noc.done(self.recv_id) {
            self.bufs.settle();
        }
    }

    /// Check whether the active buffer may be written
    pub fn write_buf_ready(&mut self) -> bool {
        self.poll_transfers();
        !self.bufs.active.in_flight
    }

    /// The active staging buffer, if no transfer still reads from it
    pub fn try_write_buf(&mut self) -> Option<StagingBuf<'_>> {
        if !self.write_buf_ready() {
            return None;
        }
        Some(self.staging())
    }

    /// The active staging buffer; spins until no transfer reads from it
    pub fn write_buf(&mut self) -> StagingBuf<'_> {
        while !self.write_buf_ready() {
            core::hint::spin_loop();
        }
        self.staging()
    }

    fn staging(&self) -> StagingBuf<'_> {
        StagingBuf {
            spm: self.common.spm,
            addr: self.bufs.active.addr,
            len: self.common.buf_size,
            _sender: core::marker::PhantomData,
        }
    }

    /// Non-blocking send of the active buffer
    ///
    /// # Returns
    /// - Ok(()) if the transfer was started
    /// - Err(TrySendError::NoCapacity) if every receiver slot is taken
    /// - Err(TrySendError::NoTransport) if no DMA could be started
    pub fn try_send(&mut self) -> Result<(), TrySendError> {
        if self.in_flight() >= self.common.num_buf {
            return Err(TrySendError::NoCapacity);
        }

        self.poll_transfers();
        if self.bufs.active.in_flight {
            return Err(TrySendError::NoTransport);
        }

        let src = self.bufs.active.addr;
        let dst = self.common.slot(self.common.remote_addr, self.send_ptr);

        // The flag travels in the same transfer, behind the payload
        self.common.spm.cell(self.common.flag(src)).store(FLAG_VALID);

        self.noc
            .dma(self.recv_id, dw(dst), dw(src), self.common.msg_dw())
            .map_err(|_| TrySendError::NoTransport)?;

        log::trace!(
            "mp: sent #{} to {} slot {} ({})",
            self.send_count,
            self.recv_id,
            self.send_ptr,
            dst
        );

        self.send_count = self.send_count.wrapping_add(1);
        self.send_ptr = if self.send_ptr + 1 == self.common.num_buf {
            0
        } else {
            self.send_ptr + 1
        };
        self.bufs.active.in_flight = true;
        self.bufs.swap();
        Ok(())
    }

    /// Send the active buffer, spinning until there is room and a DMA
    pub fn send(&mut self) {
        spin_until(|| self.try_send())
    }
}

impl<N: Noc> fmt::Debug for Sender<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("common", &self.common)
            .field("recv_id", &self.recv_id)
            .field("send_count", &self.send_count)
            .field("send_ptr", &self.send_ptr)
            .field("bufs", &self.bufs)
            .finish()
    }
}

/// The active staging buffer, writable until the next send
///
/// Borrows the sender, so the buffer cannot be sent or swapped while the
/// application still holds it.
pub struct StagingBuf<'a> {
    spm: Spm,
    addr: SpmAddr,
    len: usize,
    _sender: core::marker::PhantomData<&'a mut ()>,
}

impl StagingBuf<'_> {
    /// Payload capacity in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Scratchpad address of the payload
    pub fn addr(&self) -> SpmAddr {
        self.addr
    }

    /// Write `data` at byte `offset` of the payload
    ///
    /// # Panics
    /// If the write would run past the payload.
    pub fn write(&mut self, offset: usize, data: &[u8]) {
        assert!(
            offset.checked_add(data.len()).is_some_and(|end| end <= self.len),
            "write past staging buffer"
        );
        self.spm.write_bytes(self.addr.offset(offset), data);
    }

    /// Write `data` at the start of the payload
    pub fn copy_from_slice(&mut self, data: &[u8]) {
        self.write(0, data);
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.write(offset, &value.to_le_bytes());
    }

    /// Read back `out.len()` bytes starting at `offset`
    pub fn read(&self, offset: usize, out: &mut [u8]) {
        assert!(
            offset.checked_add(out.len()).is_some_and(|end| end <= self.len),
            "read past staging buffer"
        );
        self.spm.read_bytes(self.addr.offset(offset), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noc::{Delivery, NocConfig, SimNoc};

    const A: CoreId = CoreId(0);
    const B: CoreId = CoreId(1);

    fn sim(depth: usize) -> SimNoc {
        SimNoc::new(NocConfig {
            cores: 2,
            spm_size: 4096,
            dma_depth: depth,
            delivery: Delivery::Manual,
        })
        .unwrap()
    }

    fn sender(noc: &SimNoc, num_buf: usize) -> Sender<crate::noc::SimPort<'_>> {
        Sender::new(noc.port(A), noc.spm(A), B, SpmAddr::new(0x400), SpmAddr::new(0x100), 32, num_buf)
            .unwrap()
    }

    #[test]
    fn test_init_state() {
        let noc = sim(1);
        let tx = sender(&noc, 4);
        assert_eq!(tx.send_count(), 0);
        assert_eq!(tx.send_ptr(), 0);
        assert_eq!(tx.in_flight(), 0);
        assert_eq!(tx.buf_addr(Role::Active), SpmAddr::new(0x100));
        assert_eq!(tx.buf_addr(Role::Shadow), SpmAddr::new(0x100 + 40));
        assert_eq!(tx.common().buf_size(), 32);
    }

    #[test]
    fn test_buf_size_rounded_up() {
        let noc = sim(1);
        let tx = Sender::new(noc.port(A), noc.spm(A), B, SpmAddr::new(0x400), SpmAddr::new(0), 13, 2)
            .unwrap();
        assert_eq!(tx.common().buf_size(), 16);
        assert_eq!(tx.alloc_size(), send_footprint(16));
    }

    #[test]
    fn test_send_swaps_roles_and_lands_with_flag() {
        let noc = sim(1);
        let mut tx = sender(&noc, 4);
        let first = tx.buf_addr(Role::Active);

        tx.write_buf().copy_from_slice(b"payload!");
        tx.try_send().unwrap();
        assert_eq!(tx.buf_addr(Role::Shadow), first);
        assert_eq!(tx.send_count(), 1);
        assert_eq!(tx.send_ptr(), 1);

        noc.deliver_all();
        let mut out = [0u8; 8];
        noc.spm(B).read_bytes(SpmAddr::new(0x400), &mut out);
        assert_eq!(&out, b"payload!");
        assert_eq!(noc.spm(B).cell(SpmAddr::new(0x400 + 32)).load(), FLAG_VALID);
    }

    #[test]
    fn test_no_transport_while_link_busy() {
        let noc = sim(1);
        let mut tx = sender(&noc, 4);
        tx.try_send().unwrap();
        // the single DMA entry towards B is still occupied
        assert_eq!(tx.try_send(), Err(TrySendError::NoTransport));
        assert_eq!(tx.send_count(), 1);
        noc.deliver_all();
        assert!(tx.try_send().is_ok());
    }

    #[test]
    fn test_active_buffer_withheld_until_transfer_done() {
        let noc = sim(2);
        let mut tx = sender(&noc, 4);

        assert!(tx.try_write_buf().is_some());
        tx.try_send().unwrap();
        // the second buffer was never used
        assert!(tx.try_write_buf().is_some());
        tx.try_send().unwrap();

        // active buffer is the source of the first transfer, still queued
        assert!(!tx.write_buf_ready());
        assert!(tx.try_write_buf().is_none());
        assert_eq!(tx.try_send(), Err(TrySendError::NoTransport));

        noc.deliver_all();
        assert!(tx.write_buf_ready());
        assert!(tx.try_write_buf().is_some());
    }

    #[test]
    fn test_ring_pointer_wraps() {
        let noc = sim(1);
        let mut tx = sender(&noc, 2);
        tx.try_send().unwrap();
        noc.deliver_all();
        tx.try_send().unwrap();
        noc.deliver_all();
        assert_eq!(tx.send_ptr(), 0);
        assert_eq!(tx.try_send(), Err(TrySendError::NoCapacity));
    }

    #[test]
    fn test_counters_wrap_through_u32_max() {
        let noc = sim(1);
        let mut tx = sender(&noc, 2);
        let spm = noc.spm(A);
        let count = spm.cell(tx.common().recv_count);
        tx.send_count = u32::MAX - 1;
        count.store(u32::MAX - 1);
        assert_eq!(tx.in_flight(), 0);

        tx.write_buf().write_u32(0, 1);
        tx.try_send().unwrap();
        noc.deliver_all();
        tx.write_buf().write_u32(0, 2);
        tx.try_send().unwrap();
        noc.deliver_all();
        assert_eq!(tx.send_count(), 0);
        assert_eq!(tx.in_flight(), 2);
        assert_eq!(tx.send_ptr(), 0);
        assert_eq!(tx.try_send(), Err(TrySendError::NoCapacity));

        // the second message went to slot 1
        let second = SpmAddr::new(0x400).offset(slot_size(32));
        let mut tag = [0u8; 4];
        noc.spm(B).read_bytes(second, &mut tag);
        assert_eq!(u32::from_le_bytes(tag), 2);

        // acknowledgments cross the wrap as well
        count.store(u32::MAX);
        assert_eq!(tx.in_flight(), 1);
        tx.write_buf().write_u32(0, 3);
        tx.try_send().unwrap();
        noc.deliver_all();
        assert_eq!(tx.send_count(), 1);
        assert_eq!(tx.try_send(), Err(TrySendError::NoCapacity));

        noc.spm(B).read_bytes(SpmAddr::new(0x400), &mut tag);
        assert_eq!(u32::from_le_bytes(tag), 3);

        count.store(0);
        assert_eq!(tx.in_flight(), 1);
        count.store(1);
        assert_eq!(tx.in_flight(), 0);
    }

    #[test]
    #[should_panic(expected = "write past staging buffer")]
    fn test_staging_offset_overflow_panics() {
        let noc = sim(1);
        let mut tx = sender(&noc, 2);
        tx.write_buf().write(usize::MAX, &[0; 2]);
    }

    #[test]
    #[should_panic(expected = "outside scratchpad")]
    fn test_remote_beyond_peer_scratchpad_faults_on_send() {
        let noc = sim(1);
        // inside the NoC pointer range, past the 4 KiB of core B
        let mut tx =
            Sender::new(noc.port(A), noc.spm(A), B, SpmAddr::new(0x1000), SpmAddr::new(0x100), 32, 2)
                .unwrap();
        let _ = tx.try_send();
    }

    #[test]
    #[should_panic]
    fn test_staging_overflow_panics() {
        let noc = sim(1);
        let mut tx = sender(&noc, 2);
        tx.write_buf().write(30, &[0; 4]);
    }
}
