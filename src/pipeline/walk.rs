//! Walk thread: enumerate regular files under the chunk and send their paths to record threads.

use crossbeam_channel::Sender;
use jwalk::Parallelism;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use super::context::ScanContext;

/// One result from a directory walk: a file path to record, an entry to ignore, or an error.
pub enum WalkOutcome {
    File(PathBuf),
    Ignored,
    Err { msg: String, path: Option<PathBuf> },
}

/// Convert a jwalk result into [`WalkOutcome`]. Directories and symlinks are ignored (never followed).
pub fn to_outcome_jwalk(r: Result<jwalk::DirEntry<((), ())>, jwalk::Error>) -> WalkOutcome {
    match r {
        Ok(entry) if entry.file_type().is_file() => WalkOutcome::File(entry.path()),
        Ok(_) => WalkOutcome::Ignored,
        Err(err) => WalkOutcome::Err {
            msg: format!("{}", err),
            path: err.path().map(PathBuf::from),
        },
    }
}

fn jwalk_iter(ctx: &ScanContext, threads: usize) -> Box<dyn Iterator<Item = WalkOutcome>> {
    let mut walk = jwalk::WalkDir::new(&ctx.chunk_path)
        .skip_hidden(false)
        .follow_links(false)
        .parallelism(Parallelism::RayonNewPool(threads.max(1)));
    if ctx.files_only {
        walk = walk.max_depth(1);
    }
    Box::new(walk.into_iter().map(to_outcome_jwalk))
}

/// Spawn the walk thread. Returns the number of paths sent; drops `path_tx` when done.
pub fn spawn_walk_thread(
    path_tx: Sender<PathBuf>,
    ctx: ScanContext,
    threads: usize,
) -> JoinHandle<usize> {
    thread::spawn(move || {
        let iter = jwalk_iter(&ctx, threads);
        run_walk_loop(path_tx, &ctx, iter)
    })
}

/// Consume `iter`: send file paths, record errors as skipped entries. Never aborts on an entry error.
pub fn run_walk_loop<I>(path_tx: Sender<PathBuf>, ctx: &ScanContext, iter: I) -> usize
where
    I: Iterator<Item = WalkOutcome>,
{
    let mut count = 0_usize;
    for outcome in iter {
        match outcome {
            WalkOutcome::File(path) => {
                if path_tx.send(path).is_err() {
                    break;
                }
                count += 1;
            }
            WalkOutcome::Ignored => {}
            WalkOutcome::Err { msg, path } => {
                let path = path.unwrap_or_else(|| PathBuf::from("<no-path>"));
                ctx.record_skip(path, msg);
            }
        }
    }
    drop(path_tx);
    count
}
