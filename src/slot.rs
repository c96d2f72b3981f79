//! Single-slot, latest-wins delivery between execution contexts.
//!
//! The producer never blocks: publishing into a full slot evicts the stale
//! value and stores the fresh one. At most one value is ever in flight.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

/// Outcome of a publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Publish {
    /// Slot was empty.
    Delivered,
    /// A stale value was evicted to make room.
    Replaced,
    /// The receiving side is gone.
    Closed,
}

pub fn latest_slot<T>() -> (SlotSender<T>, SlotReceiver<T>) {
    let (tx, rx) = bounded(1);
    let alive = Arc::new(());
    (
        SlotSender {
            tx,
            evict: rx.clone(),
            alive: Arc::downgrade(&alive),
        },
        SlotReceiver { rx, alive },
    )
}

pub struct SlotSender<T> {
    tx: Sender<T>,
    // Producer-side handle used only to drop the stale value.
    evict: Receiver<T>,
    // Dead once every `SlotReceiver` is gone.
    alive: Weak<()>,
}

impl<T> Clone for SlotSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            evict: self.evict.clone(),
            alive: self.alive.clone(),
        }
    }
}

impl<T> SlotSender<T> {
    pub fn publish(&self, value: T) -> Publish {
        if self.is_closed() {
            return Publish::Closed;
        }
        let mut value = value;
        let mut replaced = false;
        // Two attempts: a consumer may race us between eviction and resend.
        for _ in 0..2 {
            match self.tx.try_send(value) {
                Ok(()) => {
                    return if replaced {
                        Publish::Replaced
                    } else {
                        Publish::Delivered
                    }
                }
                Err(TrySendError::Full(back)) => {
                    value = back;
                    replaced |= self.evict.try_recv().is_ok();
                }
                Err(TrySendError::Disconnected(_)) => return Publish::Closed,
            }
        }
        // Another producer refilled the slot; the freshest value already wins.
        Publish::Replaced
    }

    /// True once every receiver has been dropped.
    ///
    /// The channel itself never disconnects because the sender keeps an
    /// eviction handle, so liveness is tracked by the receivers' token.
    pub fn is_closed(&self) -> bool {
        self.alive.strong_count() == 0
    }
}

pub struct SlotReceiver<T> {
    rx: Receiver<T>,
    alive: Arc<()>,
}

impl<T> Clone for SlotReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            alive: Arc::clone(&self.alive),
        }
    }
}

impl<T> SlotReceiver<T> {
    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshest_value_wins() {
        let (tx, rx) = latest_slot();
        assert_eq!(tx.publish(1), Publish::Delivered);
        assert_eq!(tx.publish(2), Publish::Replaced);
        assert_eq!(tx.publish(3), Publish::Replaced);
        assert_eq!(rx.try_recv(), Some(3));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn publish_never_blocks_without_consumer_progress() {
        let (tx, rx) = latest_slot();
        for value in 0..10_000 {
            tx.publish(value);
        }
        assert_eq!(rx.try_recv(), Some(9_999));
    }

    #[test]
    fn dropped_receiver_is_reported() {
        let (tx, rx) = latest_slot::<u8>();
        assert!(!tx.is_closed());
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.publish(1), Publish::Closed);
    }

    #[test]
    fn slot_stays_open_while_any_receiver_clone_lives() {
        let (tx, rx) = latest_slot::<u8>();
        let second = rx.clone();
        let sender_clone = tx.clone();
        drop(rx);
        assert!(!tx.is_closed());
        assert_eq!(sender_clone.publish(4), Publish::Delivered);
        assert_eq!(second.try_recv(), Some(4));
        drop(second);
        assert!(tx.is_closed());
        assert!(sender_clone.is_closed());
    }

    #[test]
    fn values_cross_threads_in_order_of_freshness() {
        let (tx, rx) = latest_slot();
        let producer = std::thread::spawn(move || {
            for value in 0..100u32 {
                tx.publish(value);
            }
        });
        producer.join().unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)).unwrap(),
            99
        );
    }
}
