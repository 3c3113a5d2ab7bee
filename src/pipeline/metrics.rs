//! Periodic throughput logging for one scan.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::info;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::context::ScanCounters;

const MB: f64 = 1024.0 * 1024.0;

/// Files/sec and MB/sec since `start`.
pub fn rates(files: u64, bytes: u64, elapsed: Duration) -> (f64, f64) {
    let secs = elapsed.as_secs_f64().max(1e-3);
    (files as f64 / secs, bytes as f64 / MB / secs)
}

/// Log throughput every `interval` until `stop_rx` disconnects.
pub fn spawn_metrics_thread(
    label: String,
    counters: Arc<ScanCounters>,
    interval: Duration,
    stop_rx: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let start = Instant::now();
        loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let (files, bytes, skipped) = counters.snapshot();
                    let (fps, mbps) = rates(files, bytes, start.elapsed());
                    info!(
                        "{}: {} files, {:.1} MB, {} skipped ({:.0} files/s, {:.1} MB/s)",
                        label,
                        files,
                        bytes as f64 / MB,
                        skipped,
                        fps,
                        mbps
                    );
                }
                _ => break,
            }
        }
    })
}
