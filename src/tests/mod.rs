/*
 * Channel Protocol Test Suite
 *
 * Scenario tests that drive both ends of a channel over the simulated NoC.
 * All cores are stepped from the test thread; the fabric clock only moves
 * when a test calls `tick`, `deliver` or `deliver_all`, so every
 * interleaving below is deterministic.
 *
 * ## Suites
 * - `protocol` - flow control, ordering and acknowledgment properties
 * - `pingpong` - blocking calls over an immediately delivering fabric
 */

mod pingpong;

use crate::mp::channel::ChannelConfig;
use crate::mp::{Receiver, Sender, TrySendError};
use crate::noc::{CoreId, Delivery, NocConfig, SimNoc, SimPort};
use crate::layout::SpmLayout;
use crate::spm::SpmAddr;

/// ===============================
///  FIXTURE
/// ===============================

pub const PRODUCER: CoreId = CoreId(0);
pub const CONSUMER: CoreId = CoreId(1);

pub fn fabric(dma_depth: usize, delivery: Delivery) -> SimNoc {
    SimNoc::new(NocConfig {
        cores: 2,
        spm_size: 8 * 1024,
        dma_depth,
        delivery,
    })
    .expect("valid fabric config")
}

/// Place a PRODUCER -> CONSUMER channel and build both descriptors
pub fn channel(
    noc: &SimNoc,
    buf_size: usize,
    num_buf: usize,
) -> (Sender<SimPort<'_>>, Receiver<SimPort<'_>>) {
    let size = noc.config().spm_size;
    let mut producer = SpmLayout::new(SpmAddr::new(0), size).expect("producer layout");
    let mut consumer = SpmLayout::new(SpmAddr::new(0), size).expect("consumer layout");
    let config =
        ChannelConfig::allocate(PRODUCER, CONSUMER, &mut producer, &mut consumer, buf_size, num_buf)
            .expect("channel fits");

    let tx = config
        .send_end(noc.port(PRODUCER), noc.spm(PRODUCER))
        .expect("send end");
    let rx = config
        .recv_end(noc.port(CONSUMER), noc.spm(CONSUMER))
        .expect("receive end");
    (tx, rx)
}

/// Stage `tag` in the first word of the active buffer and try to send it
pub fn try_send_tag(tx: &mut Sender<SimPort<'_>>, tag: u32) -> Result<(), TrySendError> {
    match tx.try_write_buf() {
        Some(mut buf) => buf.write_u32(0, tag),
        None => return Err(TrySendError::NoTransport),
    }
    tx.try_send()
}
