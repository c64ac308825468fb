/*
 * Channel Configuration
 *
 * Both descriptors of a channel must agree on buffer size, buffer count and
 * on where each side's structure lives; a mismatch is undefined behavior of
 * the protocol. `ChannelConfig` keeps that information in one place and
 * derives the two mirrored descriptors from it.
 */

use super::{MpError, Receiver, Sender};
use crate::layout::{SpmLayout, check_geometry, recv_footprint, send_footprint};
use crate::noc::{CoreId, Noc};
use crate::spm::{Spm, SpmAddr};

/// Placement and geometry of one unidirectional channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub sender: CoreId,
    pub receiver: CoreId,
    /// Send structure in the sender's scratchpad
    pub send_addr: SpmAddr,
    /// Receive structure in the receiver's scratchpad
    pub recv_addr: SpmAddr,
    pub buf_size: usize,
    pub num_buf: usize,
}

impl ChannelConfig {
    /// Place a channel by reserving space in both scratchpads
    ///
    /// # Arguments
    /// * `sender` / `receiver` - Cores at the two ends
    /// * `send_layout` - Allocator of the sender's scratchpad
    /// * `recv_layout` - Allocator of the receiver's scratchpad
    /// * `buf_size` - Payload bytes per message
    /// * `num_buf` - Number of slots at the receiver
    ///
    /// # Returns
    /// - Ok(ChannelConfig) with both regions reserved
    /// - Err(MpError) with neither layout changed
    ///
    /// Only the NoC pointer range is checked here; the layouts are
    /// expected to describe scratchpads that actually exist on both cores.
    pub fn allocate(
        sender: CoreId,
        receiver: CoreId,
        send_layout: &mut SpmLayout,
        recv_layout: &mut SpmLayout,
        buf_size: usize,
        num_buf: usize,
    ) -> Result<Self, MpError> {
        check_geometry(buf_size, num_buf)?;
        // Nothing is reserved unless both ends fit
        if !send_layout.fits(send_footprint(buf_size))
            || !recv_layout.fits(recv_footprint(buf_size, num_buf))
        {
            return Err(MpError::OutOfSpace);
        }
        let send_addr = send_layout.alloc_send(buf_size)?;
        let recv_addr = recv_layout.alloc_recv(buf_size, num_buf)?;

        log::debug!(
            "mp: channel {} -> {} placed at {} / {}",
            sender,
            receiver,
            send_addr,
            recv_addr
        );

        Ok(Self {
            sender,
            receiver,
            send_addr,
            recv_addr,
            buf_size,
            num_buf,
        })
    }

    /// Build the descriptor of the sending core
    pub fn send_end<N: Noc>(&self, noc: N, spm: Spm) -> Result<Sender<N>, MpError> {
        Sender::new(
            noc,
            spm,
            self.receiver,
            self.recv_addr,
            self.send_addr,
            self.buf_size,
            self.num_buf,
        )
    }

    /// Build the descriptor of the receiving core
    pub fn recv_end<N: Noc>(&self, noc: N, spm: Spm) -> Result<Receiver<N>, MpError> {
        Receiver::new(
            noc,
            spm,
            self.sender,
            self.send_addr,
            self.recv_addr,
            self.buf_size,
            self.num_buf,
        )
    }
}
