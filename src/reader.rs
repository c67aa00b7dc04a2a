//! Block iterators over an RX channel.

use std::time::Duration;

use futures::Stream;
use tracing::debug;

use crate::channel::StreamChannel;
use crate::error::{self, Error};
use crate::Direction;

/// How often the async reader thread checks whether its consumer went away
const ASYNC_POLL: Duration = Duration::from_millis(100);

/// Blocking iterator yielding one received buffer per item.
///
/// Iteration ends once the RX direction stops streaming. A timeout is
/// yielded as `Err(Error::Timeout)` and iteration may continue.
pub struct RxBlocks {
    channel: StreamChannel,
    timeout: Duration,
}

impl RxBlocks {
    pub fn new(channel: StreamChannel, timeout: Duration) -> error::Result<Self> {
        if channel.direction() != Direction::Rx {
            return Err(Error::invalid_argument("RxBlocks needs an RX channel"));
        }
        Ok(Self { channel, timeout })
    }

    /// Give back the underlying channel
    pub fn into_inner(self) -> StreamChannel {
        self.channel
    }
}

impl Iterator for RxBlocks {
    type Item = error::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut block = vec![0u8; self.channel.buffer_size()];
        match self.channel.read(&mut block, self.timeout) {
            Ok(_) => Some(Ok(block)),
            Err(Error::NotEnabled(_)) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/**
 * Asynchronous reader of received buffers
 *
 * A background thread owns the channel and forwards every block through a
 * bounded queue. Dropping the reader stops the thread, which in turn closes
 * the channel.
 */
pub struct AsyncRxReader {
    rx: tokio::sync::mpsc::Receiver<error::Result<Vec<u8>>>,
    _handle: std::thread::JoinHandle<()>,
}

impl AsyncRxReader {
    pub fn new(mut channel: StreamChannel) -> error::Result<Self> {
        if channel.direction() != Direction::Rx {
            return Err(Error::invalid_argument("AsyncRxReader needs an RX channel"));
        }
        let (tx, rx) = tokio::sync::mpsc::channel::<error::Result<Vec<u8>>>(32);

        let handle = std::thread::spawn(move || {
            let mut block = vec![0u8; channel.buffer_size()];
            loop {
                if tx.is_closed() {
                    break;
                }
                match channel.read(&mut block, ASYNC_POLL) {
                    Ok(_) => {
                        if tx.blocking_send(Ok(block.clone())).is_err() {
                            break;
                        }
                    }
                    Err(Error::Timeout) => continue,
                    Err(Error::NotEnabled(_)) => break,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
            debug!("async RX reader stopped");
        });

        Ok(Self {
            rx,
            _handle: handle,
        })
    }
}

impl Stream for AsyncRxReader {
    type Item = error::Result<Vec<u8>>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = &mut *self;
        this.rx.poll_recv(cx)
    }
}
