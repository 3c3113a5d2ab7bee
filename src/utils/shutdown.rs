//! Cooperative shutdown flag shared by the planner, the orchestrator loop and the scan pipeline.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Atomic flag plus a wake-up channel so sleeping loops return as soon as shutdown is requested.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }

    /// Request shutdown. Safe to call from a signal handler thread, more than once.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.try_send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`; returns early (true) once shutdown is requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        match self.wake_rx.recv_timeout(timeout) {
            Ok(()) => {
                // Re-arm so other waiters wake too.
                let _ = self.wake_tx.try_send(());
                true
            }
            Err(_) => self.is_triggered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn trigger_wakes_sleeper() {
        let signal = ShutdownSignal::new();
        let other = signal.clone();
        let t = std::thread::spawn(move || {
            let start = Instant::now();
            let woke = other.wait_timeout(Duration::from_secs(10));
            (woke, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(50));
        signal.trigger();
        let (woke, elapsed) = t.join().unwrap();
        assert!(woke);
        assert!(elapsed < Duration::from_secs(5));
        assert!(signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn untriggered_wait_times_out() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
    }
}
