/*
 * Patmos Message Passing Library
 *
 * Flow-controlled message passing between the cores of a time-predictable
 * multicore. Cores have no coherent shared memory; every core owns a
 * communication scratchpad (SPM) and the network-on-chip moves data between
 * scratchpads with DMA transfers.
 *
 * Architecture:
 * - Channels are unidirectional: one sending core, one receiving core
 * - The receiver owns a ring of fixed-size slots in its scratchpad
 * - The sender stages payloads in a local double buffer and DMAs them into
 *   the next free ring slot, followed by a trailing valid flag
 * - The receiver detects arrival by polling the flag of its ring head
 * - Acknowledgments DMA the receiver's counter back to the sender, which is
 *   how consumed slots become reusable
 *
 * Nothing in the data path needs interrupts or locks: the sender and the
 * receiver each mutate only their own descriptor, and cross-core state only
 * travels through DMA writes into the other core's scratchpad.
 *
 * Module map:
 * - `layout` - alignment, flag constants and scratchpad footprints
 * - `spm`    - scratchpad addressing and volatile accessors
 * - `noc`    - the DMA transport contract and a software NoC fabric
 * - `mp`     - channel descriptors, send/receive/acknowledge
 */

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod layout;
pub mod mp;
pub mod noc;
pub mod spm;

#[cfg(test)]
mod tests;

pub use layout::{recv_footprint, send_footprint, SpmLayout};
pub use mp::channel::ChannelConfig;
pub use mp::{
    Common, MpError, Mpd, ReadBuf, Receiver, Role, Sender, StagingBuf, TryAckError,
    TryRecvError, TrySendError,
};
pub use noc::{CoreId, DwAddr, Noc, NocError};
pub use spm::{Spm, SpmAddr, SpmCell};
