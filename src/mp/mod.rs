/*
 * Message Passing Channels
 *
 * A channel is described by two descriptors, one on the sending core and
 * one on the receiving core. They are initialized independently and never
 * shared; the only state crossing cores is what the protocol DMAs:
 * - sender -> receiver: payload + trailing flag into the next ring slot
 * - receiver -> sender: the acknowledgment counter `recv_count`
 *
 * Flow control:
 * - The sender counts issued messages (`send_count`), the receiver counts
 *   acknowledged ones (`recv_count`, mirrored into the sender's SPM)
 * - `send_count - recv_count` slots are occupied at the receiver; the
 *   sender only issues a transfer while that number is below `num_buf`
 * - Receiving does not free a slot, acknowledging does. A receiver may
 *   hold several messages before acknowledging any of them
 *
 * Blocking calls busy-poll. There are no timeouts: a peer that never
 * acknowledges stalls the sender forever once the ring is full.
 */

pub mod channel;
mod recv;
mod send;

use core::fmt;

pub use recv::{ReadBuf, Receiver};
pub use send::{Role, Sender, StagingBuf};

use crate::layout::{self, DW_SIZE, dw_align, slot_size};
use crate::noc::{CoreId, DwAddr, Noc};
use crate::spm::{Spm, SpmAddr};

/// Configuration errors, reported by descriptor initialization only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpError {
    /// A base address is not double word aligned
    Misaligned { addr: SpmAddr },
    /// A channel needs at least one receive buffer
    ZeroBuffers,
    /// A channel needs a non-empty payload
    ZeroSize,
    /// The structure does not fit in the scratchpad or NoC address range
    OutOfRange { addr: SpmAddr, len: usize },
    /// Payload or ring larger than any scratchpad the NoC can address
    TooLarge { buf_size: usize, num_buf: usize },
    /// No space left in an `SpmLayout`
    OutOfSpace,
}

impl fmt::Display for MpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpError::Misaligned { addr } => write!(f, "Address {} not double word aligned", addr),
            MpError::ZeroBuffers => write!(f, "Number of buffers is zero"),
            MpError::ZeroSize => write!(f, "Buffer size is zero"),
            MpError::OutOfRange { addr, len } => {
                write!(f, "{} bytes at {} outside scratchpad", len, addr)
            }
            MpError::TooLarge { buf_size, num_buf } => write!(
                f,
                "{} buffers of {} bytes exceed the NoC address range",
                num_buf, buf_size
            ),
            MpError::OutOfSpace => write!(f, "Scratchpad layout exhausted"),
        }
    }
}

/// Why a non-blocking send did not go out. Both mean "try again".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError {
    /// All receiver slots hold unacknowledged messages
    NoCapacity,
    /// No DMA engine free, or the active buffer is still being transferred
    NoTransport,
}

impl fmt::Display for TrySendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::NoCapacity => write!(f, "No free slot at receiver"),
            TrySendError::NoTransport => write!(f, "No DMA available"),
        }
    }
}

/// Nothing has arrived in the ring head yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => write!(f, "No message received"),
        }
    }
}

/// The acknowledgment could not be sent; nothing changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryAckError {
    NoTransport,
}

impl fmt::Display for TryAckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryAckError::NoTransport => write!(f, "No DMA available for acknowledgment"),
        }
    }
}

/// Fields present at both ends of a channel
#[derive(Debug, Clone, Copy)]
pub struct Common {
    /// Local communication scratchpad
    spm: Spm,
    /// Start of the buffer structure in the peer's scratchpad
    remote_addr: SpmAddr,
    /// Start of the buffer structure in the local scratchpad
    local_addr: SpmAddr,
    /// Payload bytes per message, double word aligned
    buf_size: usize,
    /// Number of slots in the receiver's ring
    num_buf: usize,
    /// Local copy of the number of acknowledged messages
    recv_count: SpmAddr,
}

impl Common {
    pub fn remote_addr(&self) -> SpmAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> SpmAddr {
        self.local_addr
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub fn num_buf(&self) -> usize {
        self.num_buf
    }

    pub fn spm(&self) -> Spm {
        self.spm
    }

    /// Current value of the acknowledgment counter in the local SPM
    pub fn recv_count(&self) -> u32 {
        self.spm.cell(self.recv_count).load()
    }

    /// Address of slot `index` of a structure starting at `base`
    fn slot(&self, base: SpmAddr, index: usize) -> SpmAddr {
        base.offset(index * slot_size(self.buf_size))
    }

    /// Address of the flag trailing the payload at `buf`
    fn flag(&self, buf: SpmAddr) -> SpmAddr {
        buf.offset(self.buf_size)
    }

    /// Double words moved per message: payload and flag
    fn msg_dw(&self) -> u16 {
        (slot_size(self.buf_size) / DW_SIZE) as u16
    }
}

/// Validated geometry of a descriptor about to be built
struct Geometry {
    buf_size: usize,
    num_buf: usize,
}

impl Geometry {
    fn new(buf_size: usize, num_buf: usize) -> Result<Self, MpError> {
        layout::check_geometry(buf_size, num_buf)?;
        Ok(Self {
            buf_size: dw_align(buf_size),
            num_buf,
        })
    }

    /// Check both regions: the local one must also fit in `spm`
    fn check(
        &self,
        spm: &Spm,
        local: (SpmAddr, usize),
        remote: (SpmAddr, usize),
    ) -> Result<(), MpError> {
        // Alignment is reported before any range problem
        for addr in [local.0, remote.0] {
            if !layout::is_dw_aligned(addr.as_usize()) {
                return Err(MpError::Misaligned { addr });
            }
        }
        layout::check_region(local.0, local.1)?;
        layout::check_region(remote.0, remote.1)?;
        if !spm.contains(local.0, local.1) {
            return Err(MpError::OutOfRange {
                addr: local.0,
                len: local.1,
            });
        }
        Ok(())
    }
}

/// NoC pointer of an address validated at initialization
fn dw(addr: SpmAddr) -> DwAddr {
    debug_assert!(DwAddr::from_spm(addr).is_some());
    DwAddr((addr.as_usize() / DW_SIZE) as u16)
}

/// Retry `attempt` until it succeeds, without yielding the core
fn spin_until<T, E>(mut attempt: impl FnMut() -> Result<T, E>) -> T {
    loop {
        match attempt() {
            Ok(value) => return value,
            Err(_) => core::hint::spin_loop(),
        }
    }
}

/// Message passing descriptor: either end of a channel
pub enum Mpd<N: Noc> {
    Sender(Sender<N>),
    Receiver(Receiver<N>),
}

impl<N: Noc> Mpd<N> {
    /// Initialize the sending end of a channel, see [`Sender::new`]
    pub fn send_init(
        noc: N,
        spm: Spm,
        recv_id: CoreId,
        remote_addr: SpmAddr,
        local_addr: SpmAddr,
        buf_size: usize,
        num_buf: usize,
    ) -> Result<Self, MpError> {
        Sender::new(noc, spm, recv_id, remote_addr, local_addr, buf_size, num_buf)
            .map(Mpd::Sender)
    }

    /// Initialize the receiving end of a channel, see [`Receiver::new`]
    pub fn recv_init(
        noc: N,
        spm: Spm,
        send_id: CoreId,
        remote_addr: SpmAddr,
        local_addr: SpmAddr,
        buf_size: usize,
        num_buf: usize,
    ) -> Result<Self, MpError> {
        Receiver::new(noc, spm, send_id, remote_addr, local_addr, buf_size, num_buf)
            .map(Mpd::Receiver)
    }

    pub fn common(&self) -> &Common {
        match self {
            Mpd::Sender(s) => s.common(),
            Mpd::Receiver(r) => r.common(),
        }
    }

    /// Bytes this end occupies in the local scratchpad
    pub fn alloc_size(&self) -> usize {
        match self {
            Mpd::Sender(s) => s.alloc_size(),
            Mpd::Receiver(r) => r.alloc_size(),
        }
    }

    pub fn as_sender(&mut self) -> Option<&mut Sender<N>> {
        match self {
            Mpd::Sender(s) => Some(s),
            Mpd::Receiver(_) => None,
        }
    }

    pub fn as_receiver(&mut self) -> Option<&mut Receiver<N>> {
        match self {
            Mpd::Sender(_) => None,
            Mpd::Receiver(r) => Some(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{recv_footprint, send_footprint};
    use crate::noc::{NocConfig, SimNoc};

    fn noc() -> SimNoc {
        SimNoc::new(NocConfig::default()).unwrap()
    }

    #[test]
    fn test_mpd_variants() {
        let noc = noc();
        let a = CoreId(0);
        let b = CoreId(1);

        let mut tx = Mpd::send_init(
            noc.port(a),
            noc.spm(a),
            b,
            SpmAddr::new(0x200),
            SpmAddr::new(0x100),
            64,
            4,
        )
        .unwrap();
        let mut rx = Mpd::recv_init(
            noc.port(b),
            noc.spm(b),
            a,
            SpmAddr::new(0x100),
            SpmAddr::new(0x200),
            64,
            4,
        )
        .unwrap();

        assert!(tx.as_sender().is_some());
        assert!(tx.as_receiver().is_none());
        assert!(rx.as_receiver().is_some());
        assert_eq!(tx.alloc_size(), send_footprint(64));
        assert_eq!(rx.alloc_size(), recv_footprint(64, 4));
        assert_eq!(tx.common().remote_addr(), rx.common().local_addr());
        assert_eq!(rx.common().recv_count(), 0);
    }

    #[test]
    fn test_misaligned_init_fails() {
        let noc = noc();
        let a = CoreId(0);
        for (remote, local) in [(0x204, 0x100), (0x200, 0x101), (0x7, 0x3)] {
            let res = Mpd::send_init(
                noc.port(a),
                noc.spm(a),
                CoreId(1),
                SpmAddr::new(remote),
                SpmAddr::new(local),
                64,
                4,
            );
            assert!(matches!(res, Err(MpError::Misaligned { .. })));

            let res = Mpd::recv_init(
                noc.port(a),
                noc.spm(a),
                CoreId(1),
                SpmAddr::new(remote),
                SpmAddr::new(local),
                64,
                4,
            );
            assert!(matches!(res, Err(MpError::Misaligned { .. })));
        }
    }

    #[test]
    fn test_out_of_range_init_fails() {
        let noc = noc();
        let a = CoreId(0);
        let end = noc.config().spm_size as u32;
        let res = Mpd::recv_init(
            noc.port(a),
            noc.spm(a),
            CoreId(1),
            SpmAddr::new(0),
            SpmAddr::new(end - 64),
            64,
            4,
        );
        assert!(matches!(res, Err(MpError::OutOfRange { .. })));
    }

    #[test]
    fn test_error_display() {
        let err = MpError::Misaligned { addr: SpmAddr::new(4) };
        assert_eq!(format!("{}", err), "Address SPM+0x0004 not double word aligned");
        assert_eq!(format!("{}", TrySendError::NoCapacity), "No free slot at receiver");
        let err = MpError::TooLarge { buf_size: 64, num_buf: 100_000 };
        assert_eq!(format!("{}", err), "100000 buffers of 64 bytes exceed the NoC address range");
    }
}
