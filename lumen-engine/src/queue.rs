//! Single-slot latest-wins handoff between the audio callback and the
//! render loop

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Create a capacity-1 slot. The producer replaces a pending value instead
/// of blocking.
pub fn latest_slot<T>() -> (SlotSender<T>, SlotReceiver<T>) {
    let (tx, rx) = bounded(1);
    let replaced = Arc::new(AtomicU64::new(0));
    (
        SlotSender {
            tx,
            drain: rx.clone(),
            replaced: replaced.clone(),
        },
        SlotReceiver { rx, replaced },
    )
}

pub struct SlotSender<T> {
    tx: Sender<T>,
    drain: Receiver<T>,
    replaced: Arc<AtomicU64>,
}

impl<T> Clone for SlotSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            drain: self.drain.clone(),
            replaced: self.replaced.clone(),
        }
    }
}

impl<T> SlotSender<T> {
    /// Publish `value`, discarding any unread one. Never blocks.
    pub fn push(&self, value: T) {
        match self.tx.try_send(value) {
            Ok(()) => {}
            Err(TrySendError::Full(value)) => {
                if self.drain.try_recv().is_ok() {
                    self.replaced.fetch_add(1, Ordering::Relaxed);
                }
                // Lost a race with another producer: drop this value
                let _ = self.tx.try_send(value);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

pub struct SlotReceiver<T> {
    rx: Receiver<T>,
    replaced: Arc<AtomicU64>,
}

impl<T> SlotReceiver<T> {
    /// Freshest value, if one arrived since the last take
    pub fn take(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Drop any pending value
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Values overwritten before they were read
    pub fn replaced(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_wins() {
        let (tx, rx) = latest_slot();
        tx.push(1);
        tx.push(2);
        assert_eq!(rx.take(), Some(2));
        assert_eq!(rx.take(), None);
        assert_eq!(rx.replaced(), 1);
    }

    #[test]
    fn test_producer_never_blocks() {
        let (tx, rx) = latest_slot();
        for i in 0..10_000 {
            tx.push(i);
        }
        assert_eq!(rx.take(), Some(9_999));
    }

    #[test]
    fn test_clear() {
        let (tx, rx) = latest_slot();
        tx.push("a");
        rx.clear();
        assert_eq!(rx.take(), None);
    }

    #[test]
    fn test_push_after_receiver_dropped() {
        let (tx, rx) = latest_slot::<u8>();
        drop(rx);
        tx.push(1);
        tx.push(2);
    }
}
