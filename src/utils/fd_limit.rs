//! File descriptor limit detection for capping a worker's inner concurrency (Unix).

use log::debug;

/// Estimated number of file descriptors used per walk/hash task (dir handles, open files, sqlite).
pub const FDS_PER_WORKER: usize = 10;

/// Fraction of the process FD limit to use (leave headroom for the store connection and stdio).
const FD_LIMIT_FRACTION: f64 = 0.8;

/// Returns the soft limit for max open file descriptors, or `None` if unavailable (e.g. Windows).
#[cfg(unix)]
pub fn max_open_fds() -> Option<u64> {
    use std::mem::MaybeUninit;
    let mut rlim = MaybeUninit::<libc::rlimit>::uninit();
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, rlim.as_mut_ptr()) } != 0 {
        return None;
    }
    let rlim = unsafe { rlim.assume_init() };
    let cur = rlim.rlim_cur;
    // RLIM_INFINITY is typically !0; treat as "no practical limit"
    if cur == libc::RLIM_INFINITY || cur > i64::MAX as u64 {
        return None;
    }
    Some(cur)
}

#[cfg(not(unix))]
pub fn max_open_fds() -> Option<u64> {
    None
}

/// Suggested max parallelism so we stay under ~80% of the FD limit. `None` if no limit is available.
pub fn max_workers_by_fd_limit() -> Option<usize> {
    let limit = max_open_fds()?;
    let usable = (limit as f64 * FD_LIMIT_FRACTION) as usize;
    if usable < FDS_PER_WORKER {
        return Some(1);
    }
    Some(usable / FDS_PER_WORKER)
}

/// Cap `requested` by the FD limit; never returns less than 1.
pub fn determine_threads_given_fd_limit(requested: usize) -> usize {
    let requested = requested.max(1);
    match max_workers_by_fd_limit() {
        Some(cap) if cap < requested => {
            debug!("Capping concurrency {} -> {} (FD limit ~80%)", requested, cap);
            cap.max(1)
        }
        _ => requested,
    }
}
