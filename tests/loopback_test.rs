//! End-to-end streaming through the loopback transport

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bladerf_stream::{
    AsyncRxReader, Direction, Error, LoopbackTransport, RxBlocks, StreamConfig, StreamController,
};
use futures::StreamExt;

mod helpers;

const BS: usize = 64;

fn loopback(num_buffers: usize, num_concurrent: usize) -> (StreamController, Arc<LoopbackTransport>) {
    helpers::init_tracing();
    let loopback = Arc::new(LoopbackTransport::new());
    let controller = StreamController::new(
        StreamConfig::new(BS, num_buffers, num_concurrent),
        loopback.clone(),
        loopback.clone(),
    )
    .expect("valid configuration");
    (controller, loopback)
}

/// Block `n` carries its index in the first two bytes and a fill byte after
fn block(n: u16) -> Vec<u8> {
    let mut data = vec![(n % 251) as u8; BS];
    data[..2].copy_from_slice(&n.to_le_bytes());
    data
}

#[test]
fn test_samples_arrive_in_write_order() {
    let (controller, _loopback) = loopback(8, 3);
    let mut rx = controller.open(Direction::Rx).unwrap();
    let mut tx = controller.open(Direction::Tx).unwrap();
    controller.enable(Direction::Rx).unwrap();
    controller.enable(Direction::Tx).unwrap();

    const BLOCKS: u16 = 200;
    thread::scope(|s| {
        s.spawn(move || {
            for n in 0..BLOCKS {
                tx.write_all(&block(n), Duration::from_secs(5)).unwrap();
            }
        });

        let mut buf = vec![0u8; 4 * BS];
        let mut expected = 0u16;
        while expected < BLOCKS {
            let n = rx.read(&mut buf, Duration::from_secs(5)).unwrap();
            for chunk in buf[..n].chunks_exact(BS) {
                assert_eq!(chunk, block(expected).as_slice());
                expected += 1;
            }
        }
    });

    let stats = controller.stats(Direction::Rx);
    assert_eq!(stats.transfers_completed, BLOCKS as u64);
    assert_eq!(stats.bytes_transferred, BLOCKS as u64 * BS as u64);
}

#[test]
fn test_flush_tx_empties_pool() {
    let (controller, loopback) = loopback(8, 2);
    let mut tx = controller.open(Direction::Tx).unwrap();
    controller.enable(Direction::Tx).unwrap();

    let data: Vec<u8> = (0..6).flat_map(block).collect();
    assert_eq!(tx.write(&data, Duration::from_secs(1)).unwrap(), 6 * BS);
    controller.flush_tx(Duration::from_secs(5)).unwrap();

    assert!(controller.status(Direction::Tx).is_idle());
    assert_eq!(loopback.pending(), 6);
    assert_eq!(controller.stats(Direction::Tx).transfers_completed, 6);
}

#[test]
fn test_read_times_out_without_traffic() {
    let (controller, _loopback) = loopback(4, 2);
    let mut rx = controller.open(Direction::Rx).unwrap();
    controller.enable(Direction::Rx).unwrap();

    let mut buf = vec![0u8; BS];
    let err = rx.read(&mut buf, Duration::from_millis(30)).unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert_eq!(controller.status(Direction::Rx).inflight, 2);
}

#[test]
fn test_injected_blocks_are_received() {
    let (controller, loopback) = loopback(4, 2);
    let mut rx = controller.open(Direction::Rx).unwrap();
    controller.enable(Direction::Rx).unwrap();
    assert!(loopback.is_armed(Direction::Rx));

    loopback.inject(&block(7));
    let mut buf = vec![0u8; BS];
    rx.read(&mut buf, Duration::from_secs(5)).unwrap();
    assert_eq!(buf, block(7));

    drop(rx);
    assert!(!loopback.is_armed(Direction::Rx));
    assert!(controller.status(Direction::Rx).is_idle());
}

#[test]
fn test_rx_blocks_iterator() {
    let (controller, loopback) = loopback(4, 2);
    let rx = controller.open(Direction::Rx).unwrap();
    controller.enable(Direction::Rx).unwrap();
    for n in 0..3 {
        loopback.inject(&block(n));
    }

    let mut blocks = RxBlocks::new(rx, Duration::from_secs(5)).unwrap();
    for n in 0..3 {
        assert_eq!(blocks.next().unwrap().unwrap(), block(n));
    }

    controller.disable(Direction::Rx).unwrap();
    assert!(blocks.next().is_none());
}

#[test]
fn test_rx_blocks_needs_rx_channel() {
    let (controller, _loopback) = loopback(4, 2);
    let tx = controller.open(Direction::Tx).unwrap();
    assert!(matches!(
        RxBlocks::new(tx, Duration::ZERO),
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_async_reader() {
    let (controller, loopback) = loopback(8, 2);
    let rx = controller.open(Direction::Rx).unwrap();
    controller.enable(Direction::Rx).unwrap();

    let mut reader = AsyncRxReader::new(rx).unwrap();
    for n in 0..5 {
        loopback.inject(&block(n));
    }
    for n in 0..5 {
        let received = reader.next().await.unwrap().unwrap();
        assert_eq!(received, block(n));
    }

    controller.disable(Direction::Rx).unwrap();
    assert!(reader.next().await.is_none());
}
