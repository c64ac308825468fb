/*
 * Receiving End of a Channel
 *
 * The receiver owns the ring of slots the sender DMAs into. Arrival is
 * detected by polling the flag of the slot at the ring head: the flag is
 * the last double word of every transfer, so once it reads valid the whole
 * payload is in place.
 *
 * Receiving only consumes the flag and advances the head. The slot is
 * handed back to the sender by `ack`, which bumps the local counter and
 * DMAs it into the sender's scratchpad. Counter updates towards one core
 * arrive in order, so the sender only ever sees the count grow.
 */

use core::fmt;

use super::{Common, Geometry, MpError, TryAckError, TryRecvError, dw, spin_until};
use crate::layout::{
    FLAG_INVALID, FLAG_VALID, NUM_WRITE_BUF, recv_footprint, send_footprint, slot_size,
};
use crate::noc::{CoreId, Noc, dw_len};
use crate::spm::{Spm, SpmAddr};

/// Receiving end of a channel
pub struct Receiver<N: Noc> {
    common: Common,
    noc: N,
    /// Core id of the sender
    send_id: CoreId,
    /// Head of the receiving queue
    recv_ptr: usize,
    /// Address of `recv_count` in the sender's scratchpad
    remote_recv_count: SpmAddr,
    /// Most recently received message
    read_buf: Option<SpmAddr>,
    /// Number of messages received (wrapping)
    delivered: u32,
}

impl<N: Noc> Receiver<N> {
    /// Initialize the receiving end of a channel
    ///
    /// The local structure is laid out as `num_buf` slots followed by the
    /// acknowledgment counter. Every slot flag is invalidated and the
    /// counter reset, so leftovers in the scratchpad are never taken for
    /// messages.
    ///
    /// # Arguments
    /// * `noc` - Transport of the local core
    /// * `spm` - Communication scratchpad of the local core
    /// * `send_id` - Core id of the sending processor
    /// * `remote_addr` - Start of the send structure in the sender's SPM
    /// * `local_addr` - Start of the receive structure in the local SPM
    /// * `buf_size` - Payload bytes per message (rounded up to double words)
    /// * `num_buf` - Number of slots in the ring
    ///
    /// # Returns
    /// The descriptor, or `MpError::Misaligned` if either address is not
    /// double word aligned, or another `MpError` for an impossible geometry.
    ///
    /// As for `Sender::new`, the remote structure is only checked against
    /// the NoC pointer range, not against the sender's scratchpad size.
    pub fn new(
        noc: N,
        spm: Spm,
        send_id: CoreId,
        remote_addr: SpmAddr,
        local_addr: SpmAddr,
        buf_size: usize,
        num_buf: usize,
    ) -> Result<Self, MpError> {
        let geo = Geometry::new(buf_size, num_buf)?;
        geo.check(
            &spm,
            (local_addr, recv_footprint(geo.buf_size, geo.num_buf)),
            (remote_addr, send_footprint(geo.buf_size)),
        )?;

        let slot = slot_size(geo.buf_size);
        let common = Common {
            spm,
            remote_addr,
            local_addr,
            buf_size: geo.buf_size,
            num_buf: geo.num_buf,
            recv_count: local_addr.offset(geo.num_buf * slot),
        };

        for index in 0..geo.num_buf {
            let flag = common.flag(common.slot(local_addr, index));
            spm.cell(flag).store(FLAG_INVALID);
        }
        spm.cell(common.recv_count).store(0);

        log::debug!(
            "mp: receive channel from {} initialized, local {} remote {}, {} x {} bytes",
            send_id,
            local_addr,
            remote_addr,
            geo.num_buf,
            geo.buf_size
        );

        Ok(Self {
            common,
            noc,
            send_id,
            recv_ptr: 0,
            remote_recv_count: remote_addr.offset(NUM_WRITE_BUF * slot),
            read_buf: None,
            delivered: 0,
        })
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn send_id(&self) -> CoreId {
        self.send_id
    }

    /// Slot index inspected by the next receive
    pub fn recv_ptr(&self) -> usize {
        self.recv_ptr
    }

    /// Number of messages acknowledged so far (wrapping)
    pub fn recv_count(&self) -> u32 {
        self.common.recv_count()
    }

    /// Received messages not acknowledged yet
    pub fn pending_acks(&self) -> usize {
        self.delivered.wrapping_sub(self.common.recv_count()) as usize
    }

    /// Bytes this end occupies in the local scratchpad
    pub fn alloc_size(&self) -> usize {
        recv_footprint(self.common.buf_size, self.common.num_buf)
    }

    /// The most recently received message, if any
    pub fn read_buf(&self) -> Option<ReadBuf> {
        self.read_buf.map(|addr| self.view(addr))
    }

    fn view(&self, addr: SpmAddr) -> ReadBuf {
        ReadBuf {
            spm: self.common.spm,
            addr,
            len: self.common.buf_size,
        }
    }

    /// Non-blocking receive
    ///
    /// Dequeues the message at the ring head if its flag is valid. The slot
    /// stays reserved until the message is acknowledged with `ack`.
    ///
    /// # Returns
    /// - Ok(ReadBuf) view of the received payload
    /// - Err(TryRecvError::Empty) if nothing has arrived
    pub fn try_recv(&mut self) -> Result<ReadBuf, TryRecvError> {
        let slot = self.common.slot(self.common.local_addr, self.recv_ptr);
        let flag = self.common.spm.cell(self.common.flag(slot));
        if flag.load() != FLAG_VALID {
            return Err(TryRecvError::Empty);
        }
        // Valid again only once the sender rewrites this slot
        flag.store(FLAG_INVALID);

        log::trace!(
            "mp: received #{} from {} slot {}",
            self.delivered,
            self.send_id,
            self.recv_ptr
        );

        self.read_buf = Some(slot);
        self.delivered = self.delivered.wrapping_add(1);
        self.recv_ptr = if self.recv_ptr + 1 == self.common.num_buf {
            0
        } else {
            self.recv_ptr + 1
        };
        Ok(self.view(slot))
    }

    /// Receive, spinning until a message arrives
    pub fn recv(&mut self) -> ReadBuf {
        spin_until(|| self.try_recv())
    }

    /// Non-blocking acknowledgment of the oldest unacknowledged message
    ///
    /// Acknowledging with nothing pending is not refused. The sender's
    /// count then runs ahead of its `send_count` and the channel stays full
    /// for good.
    ///
    /// # Returns
    /// - Ok(()) if the new count is on its way to the sender
    /// - Err(TryAckError::NoTransport) if no DMA could be started; the
    ///   counter is left untouched
    pub fn try_ack(&mut self) -> Result<(), TryAckError> {
        // A previous counter update still in flight would read the new
        // value before we know the DMA for it can be started
        if !self.noc.done(self.send_id) {
            return Err(TryAckError::NoTransport);
        }

        if self.pending_acks() == 0 {
            log::warn!(
                "mp: acknowledging more messages than received from {}, the sender will see no capacity",
                self.send_id
            );
        }

        let count = self.common.spm.cell(self.common.recv_count);
        let old = count.load();
        count.store(old.wrapping_add(1));

        let sent = self.noc.dma(
            self.send_id,
            dw(self.remote_recv_count),
            dw(self.common.recv_count),
            dw_len(core::mem::size_of::<u32>()),
        );
        if sent.is_err() {
            count.store(old);
            return Err(TryAckError::NoTransport);
        }

        log::trace!("mp: ack #{} to {}", old, self.send_id);
        Ok(())
    }

    /// Acknowledge, spinning until a DMA is available
    pub fn ack(&mut self) {
        spin_until(|| self.try_ack())
    }
}

impl<N: Noc> fmt::Debug for Receiver<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("common", &self.common)
            .field("send_id", &self.send_id)
            .field("recv_ptr", &self.recv_ptr)
            .field("remote_recv_count", &self.remote_recv_count)
            .field("read_buf", &self.read_buf)
            .field("delivered", &self.delivered)
            .finish()
    }
}

/// View of a received payload in the local scratchpad
///
/// Valid until the message is acknowledged; after that the sender may
/// overwrite the slot at any time.
#[derive(Debug, Clone, Copy)]
pub struct ReadBuf {
    spm: Spm,
    addr: SpmAddr,
    len: usize,
}

impl ReadBuf {
    /// Payload size in bytes
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

    /// Copy `out.len()` bytes starting at byte `offset` of the payload
    ///
    /// # Panics
    /// If the read would run past the payload.
    pub fn read(&self, offset: usize, out: &mut [u8]) {
        assert!(
            offset.checked_add(out.len()).is_some_and(|end| end <= self.len),
            "read past receive buffer"
        );
        self.spm.read_bytes(self.addr.offset(offset), out);
    }

    /// Copy the start of the payload into `out`
    pub fn copy_to_slice(&self, out: &mut [u8]) {
        self.read(0, out);
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut bytes = [0u8; 4];
        self.read(offset, &mut bytes);
        u32::from_le_bytes(bytes)
    }
}
