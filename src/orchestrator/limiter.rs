//! Counting limiter over worker slots.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::time::Duration;

/// `capacity` tokens in a bounded channel. Holding a [`SlotPermit`] is holding a slot.
pub struct SlotLimiter {
    tx: Sender<()>,
    rx: Receiver<()>,
    capacity: usize,
}

/// Returns its slot on drop.
pub struct SlotPermit {
    tx: Sender<()>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        let _ = self.tx.try_send(());
    }
}

impl SlotLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        for _ in 0..capacity {
            let _ = tx.try_send(());
        }
        Self { tx, rx, capacity }
    }

    pub fn try_acquire(&self) -> Option<SlotPermit> {
        self.rx.try_recv().ok().map(|()| SlotPermit {
            tx: self.tx.clone(),
        })
    }

    pub fn acquire_timeout(&self, timeout: Duration) -> Option<SlotPermit> {
        self.rx.recv_timeout(timeout).ok().map(|()| SlotPermit {
            tx: self.tx.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_never_exceed_capacity() {
        let limiter = SlotLimiter::new(2);
        let a = limiter.try_acquire();
        let b = limiter.try_acquire();
        assert!(a.is_some() && b.is_some());
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.in_use(), 2);
        drop(a);
        assert_eq!(limiter.in_use(), 1);
        assert!(limiter.acquire_timeout(Duration::from_millis(10)).is_some());
    }
}
