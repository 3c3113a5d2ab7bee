//! Progress bar over chunk completions.

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

pub type ProgressBar = Arc<Mutex<Bar>>;

/// Bar counting finished chunks. The total grows as adaptive generation adds chunks.
pub fn create_chunk_bar(total: usize) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = total,
        desc = "Chunks",
        animation = Animation::FillUp,
        unit = " chunks"
    )))
}

/// Update the bar's total. Refreshes the display.
pub fn set_bar_total(pb: &ProgressBar, total: usize) {
    if let Ok(mut bar) = pb.try_lock() {
        bar.total = total;
        let _ = bar.refresh();
    }
}

/// Advance the bar by `n`. Skips the update when the lock is contended.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) {
    if let Ok(mut bar) = pb.try_lock() {
        let _ = bar.update(n);
    }
}

/// Advance an optional bar by one finished chunk.
pub fn tick(pb: Option<&ProgressBar>) {
    if let Some(pb) = pb {
        update_progress_bar(pb, 1);
    }
}

/// Leave the bar's last state on screen and move past it.
pub fn finish_bar(pb: Option<&ProgressBar>) {
    if let Some(pb) = pb
        && let Ok(mut bar) = pb.lock()
    {
        let _ = bar.refresh();
        eprintln!();
    }
}
