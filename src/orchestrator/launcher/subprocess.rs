//! Workers as child processes of the orchestrator, limited with rlimits.

use anyhow::{Context, Result};
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use super::{ResourceLimits, WorkerLauncher, WorkerSpec, WorkerStatus, worker_args};

pub struct SubprocessLauncher {
    exe: PathBuf,
    children: HashMap<String, Child>,
}

impl SubprocessLauncher {
    /// `exe` must understand the `worker` subcommand.
    pub fn new(exe: &Path) -> Self {
        Self {
            exe: exe.to_path_buf(),
            children: HashMap::new(),
        }
    }

    /// Launcher that re-runs the current executable.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe().context("locate current executable")?;
        Ok(Self::new(&exe))
    }
}

#[cfg(unix)]
fn apply_limits(cmd: &mut Command, limits: ResourceLimits) {
    use std::os::unix::process::CommandExt;

    // Expanded only inside the `pre_exec` unsafe block below.
    macro_rules! set_limit {
        ($resource:expr, $value:expr) => {{
            let mut cur = std::mem::MaybeUninit::<libc::rlimit>::uninit();
            if libc::getrlimit($resource, cur.as_mut_ptr()) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            let cur = cur.assume_init();
            let want = $value as libc::rlim_t;
            let lim = libc::rlimit {
                rlim_cur: if cur.rlim_max == libc::RLIM_INFINITY {
                    want
                } else {
                    want.min(cur.rlim_max)
                },
                rlim_max: cur.rlim_max,
            };
            if libc::setrlimit($resource, &lim) != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }};
    }

    let memory = limits.memory_bytes;
    let nofile = limits.nofile;
    // Runs in the forked child before exec: only async-signal-safe calls.
    unsafe {
        cmd.pre_exec(move || {
            set_limit!(libc::RLIMIT_AS, memory);
            set_limit!(libc::RLIMIT_NOFILE, nofile);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_limits(_cmd: &mut Command, _limits: ResourceLimits) {}

/// Thread budget implied by a CPU ceiling.
fn concurrency_for(spec: &WorkerSpec) -> usize {
    let cpu_threads = spec.limits.cpus.ceil().max(1.0) as usize;
    spec.concurrency.clamp(1, cpu_threads.max(1))
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

impl WorkerLauncher for SubprocessLauncher {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn launch(&mut self, spec: &WorkerSpec) -> Result<()> {
        let mut cmd = Command::new(&self.exe);
        cmd.args(worker_args(spec, &spec.store_path, concurrency_for(spec)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        apply_limits(&mut cmd, spec.limits);
        let child = cmd
            .spawn()
            .with_context(|| format!("spawn {} for {}", self.exe.display(), spec.worker_id))?;
        debug!("{} started as pid {}", spec.worker_id, child.id());
        self.children.insert(spec.worker_id.clone(), child);
        Ok(())
    }

    fn poll(&mut self, ids: &[String]) -> Result<HashMap<String, WorkerStatus>> {
        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            let status = match self.children.get_mut(id) {
                None => WorkerStatus::Missing,
                Some(child) => match child.try_wait() {
                    Ok(Some(status)) => WorkerStatus::Exited(exit_code(status)),
                    Ok(None) => WorkerStatus::Running,
                    Err(e) => {
                        debug!("try_wait {}: {}", id, e);
                        WorkerStatus::Missing
                    }
                },
            };
            out.insert(id.clone(), status);
        }
        Ok(out)
    }

    fn kill(&mut self, id: &str) -> Result<()> {
        if let Some(child) = self.children.get_mut(id) {
            // Already exited is fine.
            let _ = child.kill();
            child.wait().with_context(|| format!("wait for killed worker {id}"))?;
        }
        Ok(())
    }

    fn reap(&mut self, id: &str) -> Result<()> {
        if let Some(mut child) = self.children.remove(id)
            && child.try_wait().ok().flatten().is_none()
        {
            let _ = child.kill();
            let _ = child.wait();
        }
        Ok(())
    }
}

impl Drop for SubprocessLauncher {
    fn drop(&mut self) {
        for (_, mut child) in self.children.drain() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
