use super::*;

/// Request/response over two channels with the blocking calls only.
///
/// With immediate delivery every DMA has landed by the time `dma` returns,
/// so no blocking call below ever has to wait for the fabric clock.
#[test]
fn blocking_ping_pong() {
    let noc = fabric(1, Delivery::Immediate);
    let size = noc.config().spm_size;
    let mut producer = SpmLayout::new(SpmAddr::new(0), size).unwrap();
    let mut consumer = SpmLayout::new(SpmAddr::new(0), size).unwrap();

    let ping = ChannelConfig::allocate(PRODUCER, CONSUMER, &mut producer, &mut consumer, 8, 2).unwrap();
    let pong = ChannelConfig::allocate(CONSUMER, PRODUCER, &mut consumer, &mut producer, 8, 2).unwrap();

    let mut ping_tx = ping.send_end(noc.port(PRODUCER), noc.spm(PRODUCER)).unwrap();
    let mut ping_rx = ping.recv_end(noc.port(CONSUMER), noc.spm(CONSUMER)).unwrap();
    let mut pong_tx = pong.send_end(noc.port(CONSUMER), noc.spm(CONSUMER)).unwrap();
    let mut pong_rx = pong.recv_end(noc.port(PRODUCER), noc.spm(PRODUCER)).unwrap();

    for round in 0..20u32 {
        ping_tx.write_buf().write_u32(0, round);
        ping_tx.send();

        let request = ping_rx.recv().read_u32(0);
        ping_rx.ack();
        pong_tx.write_buf().write_u32(0, request * 2);
        pong_tx.send();

        assert_eq!(pong_rx.recv().read_u32(0), round * 2);
        pong_rx.ack();
    }

    assert_eq!(ping_tx.send_count(), 20);
    assert_eq!(ping_tx.in_flight(), 0);
    assert_eq!(pong_tx.in_flight(), 0);
    assert_eq!(ping_rx.pending_acks(), 0);
}

#[test]
fn blocking_send_streams_up_to_capacity() {
    let noc = fabric(1, Delivery::Immediate);
    let (mut tx, mut rx) = channel(&noc, 16, 4);

    for tag in 0..4 {
        tx.write_buf().write_u32(0, tag);
        tx.send();
    }
    assert_eq!(tx.in_flight(), 4);
    assert_eq!(try_send_tag(&mut tx, 4), Err(TrySendError::NoCapacity));

    for tag in 0..4 {
        assert_eq!(rx.recv().read_u32(0), tag);
        rx.ack();
    }
    assert_eq!(tx.in_flight(), 0);
}
