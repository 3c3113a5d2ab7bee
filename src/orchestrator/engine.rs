//! The main loop: plan, dispatch under the slot limit, poll, retry, abandon, finish.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Instant;

use crate::engine::db_ops::{CheckpointStore, StoreOptions};
use crate::engine::progress::{self, ProgressBar};
use crate::engine::tools::{
    check_and_canonicalize_root, depth_below, direct_files_summary, is_empty_directory, unix_now,
};
use crate::planner::{
    ChunkPlanner, CompletedSet, Frontier, FrontierOrigin, PlannerOptions, sort_for_dispatch,
};
use crate::types::{Chunk, ChunkKind, ChunkScope, RunConfig, StoreStats};
use crate::utils::logger::Colors;
use crate::utils::shutdown::ShutdownSignal;

use super::context::RunContext;
use super::launcher::{ResourceLimits, WorkerLauncher, WorkerSpec, WorkerStatus};
use super::limiter::{SlotLimiter, SlotPermit};
use super::report::{AbandonedChunk, RunReport};
use super::state::{ChunkState, ChunkTracker, RetryQueue, backoff_delay};

/// A launched worker as the orchestrator sees it.
#[derive(Clone, Debug)]
pub struct WorkerHandle {
    pub worker_id: String,
    pub chunk: Chunk,
    pub started: Instant,
    pub limits: ResourceLimits,
}

struct ActiveWorker {
    handle: WorkerHandle,
    retry_count: u32,
    _permit: SlotPermit,
}

#[derive(Default)]
struct FailureHistory {
    attempts: u32,
    last_reason: String,
    backoff_ms: Vec<u64>,
}

/// Drive one run to completion or cancellation with the given launcher.
///
/// Fatal (returned as `Err`) only when the root is missing or unreadable or the store cannot be
/// created; chunk failures end up in the report.
pub fn run_with_launcher<L: WorkerLauncher>(
    config: &RunConfig,
    launcher: L,
    shutdown: ShutdownSignal,
) -> Result<RunReport> {
    let root = check_and_canonicalize_root(&config.root)?;
    // Workers may run with another working directory (or inside a container).
    let store_path = std::path::absolute(&config.db_path)
        .with_context(|| format!("resolve store path {}", config.db_path.display()))?;
    let store = CheckpointStore::open(
        &store_path,
        StoreOptions {
            batch_size: config.batch_size,
            flush_interval: config.flush_interval,
            ..StoreOptions::default()
        },
    )
    .context("create checkpoint store")?;
    let completed = CompletedSet::from(store.load_completed_chunks(&config.mount_name)?);
    if !completed.is_empty() {
        info!(
            "resuming: {} chunks already complete for mount '{}'",
            completed.len(),
            config.mount_name
        );
    }

    let ctx = RunContext::new(shutdown.clone());
    info!(
        "run {} over {} with the {} launcher ({} workers max)",
        ctx.run_id,
        root.display(),
        launcher.name(),
        config.max_workers
    );

    let planner = ChunkPlanner::new(PlannerOptions::from(config), shutdown);
    let mut frontier = Frontier::new();
    let mut chunks = if config.fast_start {
        planner.fast_chunks(&root, &config.mount_name, &completed, &mut frontier)?
    } else {
        planner.initial_chunks(&root, &config.mount_name, &completed)?
    };
    sort_for_dispatch(&mut chunks);

    let mut orch = Orchestrator::new(config, launcher, store, store_path, root, planner, completed, ctx);
    orch.frontier = frontier;
    for chunk in chunks {
        orch.enqueue(chunk, 0);
    }
    orch.run_loop()?;
    orch.finish()
}

struct Orchestrator<'a, L: WorkerLauncher> {
    config: &'a RunConfig,
    launcher: L,
    store: CheckpointStore,
    store_path: PathBuf,
    root: PathBuf,
    planner: ChunkPlanner,
    completed: CompletedSet,
    ctx: RunContext,
    limiter: SlotLimiter,
    limits: ResourceLimits,
    tracker: ChunkTracker,
    pending: VecDeque<(Chunk, u32)>,
    active: HashMap<String, ActiveWorker>,
    retries: RetryQueue,
    frontier: Frontier,
    failures: HashMap<String, FailureHistory>,
    abandoned: Vec<AbandonedChunk>,
    bar: Option<ProgressBar>,
    cancelled: bool,
}

impl<'a, L: WorkerLauncher> Orchestrator<'a, L> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        config: &'a RunConfig,
        launcher: L,
        store: CheckpointStore,
        store_path: PathBuf,
        root: PathBuf,
        planner: ChunkPlanner,
        completed: CompletedSet,
        ctx: RunContext,
    ) -> Self {
        let bar = config.verbose.then(|| progress::create_chunk_bar(0));
        Self {
            config,
            launcher,
            store,
            store_path,
            root,
            planner,
            completed,
            ctx,
            limiter: SlotLimiter::new(config.max_workers),
            limits: ResourceLimits::derive(config),
            tracker: ChunkTracker::new(),
            pending: VecDeque::new(),
            active: HashMap::new(),
            retries: RetryQueue::new(),
            frontier: Frontier::new(),
            failures: HashMap::new(),
            abandoned: Vec::new(),
            bar,
            cancelled: false,
        }
    }

    /// Track a new chunk as pending. Keys already known to this run are dropped.
    fn enqueue(&mut self, chunk: Chunk, retry_count: u32) {
        if !self.tracker.insert_pending(&chunk.key()) {
            debug!("{} already tracked in this run", chunk.key());
            return;
        }
        self.pending.push_back((chunk, retry_count));
        if let Some(bar) = &self.bar {
            progress::set_bar_total(bar, self.tracker.len());
        }
    }

    fn run_loop(&mut self) -> Result<()> {
        let poll_interval = self.config.poll_interval;
        let status_interval = self.config.status_interval;
        let mut next_poll = Instant::now() + poll_interval;
        let mut next_status = Instant::now() + status_interval;

        loop {
            if self.ctx.shutdown.is_triggered() {
                self.cancel();
                break;
            }
            self.promote_retries()?;
            self.refill();
            self.dispatch()?;

            let now = Instant::now();
            if now >= next_poll {
                self.poll_active()?;
                next_poll = Instant::now() + poll_interval;
            }
            if self.is_done() {
                break;
            }
            if now >= next_status {
                self.log_status();
                next_status = now + status_interval;
            }

            let now = Instant::now();
            let mut wait = next_poll
                .saturating_duration_since(now)
                .min(next_status.saturating_duration_since(now));
            if let Some(ready_in) = self.retries.next_ready_in(now) {
                wait = wait.min(ready_in);
            }
            self.ctx.shutdown.wait_timeout(wait);
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.pending.is_empty()
            && self.active.is_empty()
            && self.retries.is_empty()
            && self.frontier.is_empty()
    }

    fn promote_retries(&mut self) -> Result<()> {
        for entry in self.retries.take_ready(Instant::now()) {
            self.tracker
                .transition(&entry.chunk.key(), ChunkState::Pending)?;
            debug!(
                "retrying {} (attempt {})",
                entry.chunk.path.display(),
                entry.retry_count + 1
            );
            self.pending.push_back((entry.chunk, entry.retry_count));
        }
        Ok(())
    }

    /// Adaptive generation when the pending queue runs low.
    fn refill(&mut self) {
        if self.frontier.is_empty() || self.pending.len() >= self.config.max_workers {
            return;
        }
        let mut chunks = self.planner.adaptive_chunks(
            &mut self.frontier,
            &self.config.mount_name,
            &self.completed,
            self.config.adaptive_batch,
        );
        sort_for_dispatch(&mut chunks);
        for chunk in chunks {
            self.enqueue(chunk, 0);
        }
    }

    /// Launch pending chunks while slots are free.
    fn dispatch(&mut self) -> Result<()> {
        while !self.pending.is_empty() && !self.ctx.shutdown.is_triggered() {
            let Some(permit) = self.limiter.try_acquire() else {
                break;
            };
            let Some((chunk, retry_count)) = self.pending.pop_front() else {
                break;
            };
            self.launch(chunk, retry_count, permit)?;
        }
        Ok(())
    }

    fn launch(&mut self, chunk: Chunk, retry_count: u32, permit: SlotPermit) -> Result<()> {
        let key = chunk.key();
        self.tracker.transition(&key, ChunkState::Active)?;
        self.ctx.counters.total_attempts += 1;

        // The tree may have changed since planning.
        if !chunk.path.is_dir() {
            return self.fail(chunk, retry_count, "chunk path no longer exists".to_string());
        }
        let nothing_to_scan = match chunk.scope {
            ChunkScope::Subtree => is_empty_directory(&chunk.path),
            ChunkScope::DirectFiles => direct_files_summary(&chunk.path).map(|(n, _)| n == 0),
        };
        match nothing_to_scan {
            Ok(true) => {
                debug!("{} has nothing to scan", key);
                return self.complete(chunk, retry_count);
            }
            Ok(false) => {}
            Err(e) => return self.fail(chunk, retry_count, format!("cannot read chunk: {e}")),
        }

        if let Err(e) = self.store.mark_chunk_started(&chunk) {
            warn!("could not mark {} as started: {:#}", key, e);
        }
        let spec = WorkerSpec {
            worker_id: self.ctx.next_worker_id(&chunk),
            chunk,
            store_path: self.store_path.clone(),
            concurrency: self.config.worker_concurrency,
            limits: self.limits,
        };
        match self.launcher.launch(&spec) {
            Ok(()) => {
                self.ctx.counters.launched += 1;
                debug!("launched {} for {} ({})", spec.worker_id, key, spec.chunk.kind);
                self.active.insert(
                    spec.worker_id.clone(),
                    ActiveWorker {
                        handle: WorkerHandle {
                            worker_id: spec.worker_id,
                            chunk: spec.chunk,
                            started: Instant::now(),
                            limits: spec.limits,
                        },
                        retry_count,
                        _permit: permit,
                    },
                );
                Ok(())
            }
            Err(e) => {
                self.ctx.counters.launch_failures += 1;
                self.fail(spec.chunk, retry_count, format!("launch failed: {e:#}"))
            }
        }
    }

    /// One batched status query over every active worker.
    fn poll_active(&mut self) -> Result<()> {
        if self.active.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = self.active.keys().cloned().collect();
        let statuses = match self.launcher.poll(&ids) {
            Ok(s) => s,
            Err(e) => {
                // Runtime limits still apply while the launcher cannot answer.
                warn!("status poll failed: {:#}", e);
                ids.iter()
                    .map(|id| (id.clone(), WorkerStatus::Running))
                    .collect()
            }
        };

        for id in ids {
            let status = statuses
                .get(&id)
                .copied()
                .unwrap_or(WorkerStatus::Missing);
            let elapsed = self
                .active
                .get(&id)
                .map(|w| w.handle.started.elapsed())
                .unwrap_or_default();
            match status {
                WorkerStatus::Running if elapsed > self.config.max_runtime => {
                    warn!("{} exceeded {:?}; killing it", id, self.config.max_runtime);
                    if let Err(e) = self.launcher.kill(&id) {
                        warn!("kill {}: {:#}", id, e);
                    }
                    self.ctx.counters.timeouts += 1;
                    let reason = format!("timed out after {:.0}s", elapsed.as_secs_f64());
                    self.finish_worker(&id, Err(reason))?;
                }
                WorkerStatus::Running => {}
                WorkerStatus::Exited(0) => self.finish_worker(&id, Ok(()))?,
                WorkerStatus::Exited(code) => {
                    let reason = match self.launcher.describe_failure(&id) {
                        Some(detail) => format!("exit code {code}: {detail}"),
                        None => format!("exit code {code}"),
                    };
                    self.finish_worker(&id, Err(reason))?;
                }
                WorkerStatus::Missing => {
                    self.finish_worker(&id, Err("worker disappeared".to_string()))?;
                }
            }
        }
        Ok(())
    }

    /// Reap a worker that reached a terminal status, free its slot and record the outcome.
    fn finish_worker(&mut self, id: &str, outcome: std::result::Result<(), String>) -> Result<()> {
        if let Err(e) = self.launcher.reap(id) {
            warn!("reap {}: {:#}", id, e);
        }
        let Some(worker) = self.active.remove(id) else {
            return Ok(());
        };
        let ActiveWorker {
            handle,
            retry_count,
            ..
        } = worker;
        match outcome {
            Ok(()) => {
                debug!(
                    "{} finished {} in {:.1}s",
                    handle.worker_id,
                    handle.chunk.path.display(),
                    handle.started.elapsed().as_secs_f64()
                );
                self.complete(handle.chunk, retry_count)
            }
            Err(reason) => self.fail(handle.chunk, retry_count, reason),
        }
    }

    fn complete(&mut self, chunk: Chunk, retry_count: u32) -> Result<()> {
        let key = chunk.key();
        if let Err(e) = self.store.mark_chunk_completed(&chunk) {
            return self.fail(chunk, retry_count, format!("{e:#}"));
        }
        self.tracker.transition(&key, ChunkState::Completed)?;
        self.completed.insert(key);
        self.ctx.counters.completed += 1;
        progress::tick(self.bar.as_ref());
        Ok(())
    }

    /// Route a failed attempt to the retry queue, or abandon the chunk once retries are exhausted.
    fn fail(&mut self, chunk: Chunk, retry_count: u32, reason: String) -> Result<()> {
        let key = chunk.key();
        self.ctx.counters.failed_attempts += 1;
        let history = self.failures.entry(key.clone()).or_default();
        history.attempts += 1;
        history.last_reason = reason;

        if retry_count < self.config.max_retries {
            let delay = backoff_delay(retry_count, self.config.backoff_base, self.config.backoff_cap);
            history.backoff_ms.push(delay.as_millis() as u64);
            warn!(
                "{} failed (attempt {}/{}): {}; retrying in {:?}",
                key,
                retry_count + 1,
                self.config.max_retries + 1,
                history.last_reason,
                delay
            );
            self.tracker.transition(&key, ChunkState::RetryWait)?;
            self.retries
                .push(chunk, retry_count + 1, Instant::now() + delay);
            return Ok(());
        }

        error!(
            "{} abandoned after {} attempts: {}",
            key, history.attempts, history.last_reason
        );
        self.abandoned.push(AbandonedChunk {
            path: key.clone(),
            attempts: history.attempts,
            reason: history.last_reason.clone(),
            backoff_ms: history.backoff_ms.clone(),
        });
        self.tracker.transition(&key, ChunkState::Abandoned)?;
        self.ctx.counters.abandoned += 1;
        progress::tick(self.bar.as_ref());

        if chunk.scope == ChunkScope::Subtree && chunk.kind != ChunkKind::Emergency {
            let depth = depth_below(&chunk.path, &self.root);
            self.frontier
                .push(&chunk.path, depth, FrontierOrigin::Abandoned);
        }
        Ok(())
    }

    /// Stop launching, kill every active worker and put its chunk back to pending.
    fn cancel(&mut self) {
        self.cancelled = true;
        if self.active.is_empty() {
            return;
        }
        warn!(
            "shutdown requested: stopping {} active workers",
            self.active.len()
        );
        let ids: Vec<String> = self.active.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.launcher.kill(&id) {
                warn!("kill {}: {:#}", id, e);
            }
            if let Err(e) = self.launcher.reap(&id) {
                warn!("reap {}: {:#}", id, e);
            }
            if let Some(worker) = self.active.remove(&id) {
                let key = worker.handle.chunk.key();
                if let Err(e) = self.tracker.transition(&key, ChunkState::Pending) {
                    debug!("{:#}", e);
                }
                self.pending.push_front((worker.handle.chunk, worker.retry_count));
            }
        }
    }

    fn log_status(&self) {
        let c = self.tracker.counts();
        info!(
            "{} active / {} pending / {} retrying / {} / {} ({} attempts, {} frontier)",
            c.active,
            c.pending,
            c.retry_wait,
            Colors::colorize(Colors::COMPLETED, &format!("{} completed", c.completed)),
            Colors::colorize(Colors::ABANDONED, &format!("{} abandoned", c.abandoned)),
            self.ctx.counters.total_attempts,
            self.frontier.len()
        );
    }

    /// Flush the store, record run statistics and build the report.
    fn finish(self) -> Result<RunReport> {
        progress::finish_bar(self.bar.as_ref());
        let mount = self.config.mount_name.as_str();

        if let Err(e) = self.store.flush() {
            error!("final checkpoint flush failed: {:#}", e);
        }
        let stats = self.store.get_stats(mount).unwrap_or_else(|e| {
            warn!("could not read store statistics: {:#}", e);
            StoreStats::default()
        });
        if let Err(e) = self
            .store
            .record_run_stats(mount, stats, self.ctx.started_unix, unix_now())
        {
            warn!("could not record run statistics: {:#}", e);
        }

        let counts = self.tracker.counts();
        let report = RunReport {
            run_id: self.ctx.run_id.clone(),
            root: self.root.clone(),
            mount: mount.to_string(),
            completed: counts.completed,
            abandoned: self.abandoned,
            pending: counts.pending + counts.retry_wait + counts.active,
            total_attempts: self.ctx.counters.total_attempts,
            failed_attempts: self.ctx.counters.failed_attempts,
            timeouts: self.ctx.counters.timeouts,
            elapsed_secs: self.ctx.started.elapsed().as_secs_f64(),
            cancelled: self.cancelled,
            store: stats,
        };

        let summary = self.store.close_and_checkpoint()?;
        if summary.unflushed > 0 {
            error!(
                "{} checkpoint writes were lost; affected chunks rescan on the next run",
                summary.unflushed
            );
        }
        if let Some(path) = &self.config.report_path {
            report.write_json(path)?;
        }
        report.log_summary();
        Ok(report)
    }
}
