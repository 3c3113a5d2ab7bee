use log::{debug, warn};

use super::context::ScanContext;

/// Log skipped entries after the walk and record threads have been joined.
pub fn report_skipped_paths(ctx: &ScanContext, verbose: bool) {
    let (_, _, skipped) = ctx.counters.snapshot();
    if skipped == 0 {
        return;
    }
    warn!(
        "Skipped {} entries under {} due to permission errors or access issues",
        skipped,
        ctx.chunk_path.display()
    );
    let sample = ctx.skipped_paths.lock().unwrap_or_else(|e| e.into_inner());
    for (path, msg) in sample.iter() {
        if verbose {
            warn!("  skipped: {} ({})", path.display(), msg);
        } else {
            debug!("  skipped: {} ({})", path.display(), msg);
        }
    }
}
