//! Bounded queue with drop-oldest overflow, built on crossbeam channels.
//!
//! The sender never blocks: when the queue is full the oldest item is
//! evicted and the send retried, so a slow consumer costs latency on its
//! own edge only.

use std::time::Duration;

pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

#[derive(thiserror::Error, Debug)]
#[error("queue receive timeout")]
pub struct RecvTimeoutError {
    #[from]
    source: crossbeam_channel::RecvTimeoutError,
}

impl RecvTimeoutError {
    #[inline(always)]
    pub fn is_timeout(&self) -> bool {
        self.source.is_timeout()
    }
}

pub struct Sender<T> {
    tx: crossbeam_channel::Sender<T>,
    // kept so the sender can evict when full; also keeps the channel alive
    rx: crossbeam_channel::Receiver<T>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Sender<T> {
    /// Enqueue `item`, evicting the oldest entries if the queue is full.
    /// Returns how many items were dropped to make room.
    pub fn send_drop_oldest(&self, item: T) -> usize {
        let mut dropped = 0;
        let mut item = item;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return dropped,
                Err(crossbeam_channel::TrySendError::Full(back)) => {
                    item = back;
                    if self.rx.try_recv().is_ok() {
                        dropped += 1;
                    }
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => return dropped,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

pub struct Receiver<T> {
    rx: crossbeam_channel::Receiver<T>,
}

impl<T> Receiver<T> {
    #[inline(always)]
    pub fn recv_timeout(&self, dur: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(dur).map_err(Into::into)
    }

    #[inline(always)]
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(cap: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(cap);
    (
        Sender {
            tx,
            rx: rx.clone(),
        },
        Receiver { rx },
    )
}
