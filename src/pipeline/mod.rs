//! Scan worker pipeline: context, walk loop, record threads, metrics.

pub mod context;
pub mod error_handler;
pub mod metadata;
pub mod metrics;
pub mod scan;
pub mod walk;

pub use context::{ScanChannels, ScanContext, ScanCounters, create_scan_channels};
pub use error_handler::report_skipped_paths;
pub use metadata::{path_to_record, spawn_record_workers};
pub use scan::run_scan_worker;
pub use walk::{WalkOutcome, run_walk_loop, spawn_walk_thread, to_outcome_jwalk};
