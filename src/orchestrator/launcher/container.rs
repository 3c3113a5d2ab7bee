//! Workers as containers started through a container runtime CLI (docker, podman).

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::engine::tools::path_to_db_string;
use crate::utils::config::{PackagePaths, RetryConsts};

use super::{WorkerLauncher, WorkerSpec, WorkerStatus, worker_args};

/// Mount point of the store directory inside every worker container.
const STORE_MOUNT: &str = "/data";
/// Log lines fetched when describing a failed worker.
const LOG_TAIL_LINES: usize = 20;
/// How often a pending runtime call is checked for exit.
const CALL_CHECK_INTERVAL: Duration = Duration::from_millis(20);

pub struct ContainerLauncher {
    runtime: String,
    image: String,
    call_timeout: Duration,
    host_store_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    name: String,
    state: InspectState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    running: bool,
    #[serde(default)]
    exit_code: i32,
    #[serde(default, rename = "OOMKilled")]
    oom_killed: bool,
}

/// Parse the JSON array printed by `<runtime> inspect` into statuses keyed by container name.
pub fn parse_inspect_output(stdout: &str) -> Result<HashMap<String, WorkerStatus>> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(stdout.trim()).context("parse inspect output")?;
    let mut out = HashMap::with_capacity(entries.len());
    for e in entries {
        let name = e.name.trim_start_matches('/').to_string();
        let status = match e.state.status.as_str() {
            _ if e.state.running => WorkerStatus::Running,
            "created" | "running" | "restarting" | "paused" => WorkerStatus::Running,
            _ if e.state.oom_killed && e.state.exit_code == 0 => WorkerStatus::Exited(137),
            _ => WorkerStatus::Exited(e.state.exit_code),
        };
        out.insert(name, status);
    }
    Ok(out)
}

impl ContainerLauncher {
    pub fn new(runtime: &str, image: &str) -> Self {
        Self {
            runtime: runtime.to_string(),
            image: image.to_string(),
            call_timeout: RetryConsts::RUNTIME_CALL_TIMEOUT,
            host_store_dir: None,
        }
    }

    /// Bind `dir` as the store directory instead of the store path's parent. Needed when this
    /// process runs in a container and the runtime resolves bind sources on the host.
    pub fn with_host_store_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.host_store_dir = dir;
        self
    }

    /// Full `run` argument list for one worker.
    pub fn run_args(&self, spec: &WorkerSpec) -> Result<Vec<String>> {
        let chunk = path_to_db_string(&spec.chunk.path);
        let store_dir = match &self.host_store_dir {
            Some(dir) => dir.as_path(),
            None => spec
                .store_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new(".")),
        };
        let store_file = spec
            .store_path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("store path has no file name"))?;
        let store_in_container = Path::new(STORE_MOUNT).join(store_file);
        let nofile = spec.limits.nofile;

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.worker_id.clone(),
            "-v".to_string(),
            format!("{chunk}:{chunk}:ro"),
            "-v".to_string(),
            format!("{}:{}", path_to_db_string(store_dir), STORE_MOUNT),
            "--cpus".to_string(),
            format!("{:.2}", spec.limits.cpus),
            "--memory".to_string(),
            spec.limits.memory_bytes.to_string(),
            "--ulimit".to_string(),
            format!("nofile={nofile}:{nofile}"),
            self.image.clone(),
            PackagePaths::get().pkg_name().to_string(),
        ];
        args.extend(worker_args(spec, &store_in_container, spec.concurrency));
        Ok(args)
    }

    /// Run the runtime CLI with a bound on its duration. A call still running at the bound is
    /// killed and reaped.
    fn call(&self, args: Vec<String>) -> Result<Output> {
        let label = args.first().cloned().unwrap_or_default();
        let mut child = Command::new(&self.runtime)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("run {} {}", self.runtime, label))?;
        // Drained concurrently so a large inspect output cannot fill the pipe and stall the call.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.call_timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() < deadline => thread::sleep(CALL_CHECK_INTERVAL),
                Ok(None) => {
                    if let Err(e) = child.kill() {
                        debug!("kill {} {}: {}", self.runtime, label, e);
                    }
                    let _ = child.wait();
                    anyhow::bail!(
                        "{} {} did not finish within {:?}",
                        self.runtime,
                        label,
                        self.call_timeout
                    );
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e).with_context(|| format!("wait for {} {}", self.runtime, label));
                }
            }
        };
        Ok(Output {
            status,
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }
}

/// Read a child pipe to the end on its own thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

impl WorkerLauncher for ContainerLauncher {
    fn name(&self) -> &'static str {
        "container"
    }

    fn launch(&mut self, spec: &WorkerSpec) -> Result<()> {
        let out = self.call(self.run_args(spec)?)?;
        if !out.status.success() {
            anyhow::bail!(
                "{} run failed: {}",
                self.runtime,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        debug!(
            "{} started as container {}",
            spec.worker_id,
            String::from_utf8_lossy(&out.stdout).trim()
        );
        Ok(())
    }

    fn poll(&mut self, ids: &[String]) -> Result<HashMap<String, WorkerStatus>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut args = vec!["inspect".to_string()];
        args.extend(ids.iter().cloned());
        let out = self.call(args)?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        // A missing container makes inspect exit non-zero but the others are still printed.
        match parse_inspect_output(&stdout) {
            Ok(statuses) => Ok(statuses),
            Err(_) if stdout.trim().is_empty() || stdout.trim() == "[]" => Ok(HashMap::new()),
            Err(e) => Err(e),
        }
    }

    fn kill(&mut self, id: &str) -> Result<()> {
        let out = self.call(vec!["kill".to_string(), id.to_string()])?;
        if !out.status.success() {
            debug!(
                "{} kill {}: {}",
                self.runtime,
                id,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(())
    }

    fn reap(&mut self, id: &str) -> Result<()> {
        let out = self.call(vec!["rm".to_string(), "-f".to_string(), id.to_string()])?;
        if !out.status.success() {
            warn!(
                "{} rm {}: {}",
                self.runtime,
                id,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(())
    }

    fn describe_failure(&mut self, id: &str) -> Option<String> {
        let out = self
            .call(vec![
                "logs".to_string(),
                "--tail".to_string(),
                LOG_TAIL_LINES.to_string(),
                id.to_string(),
            ])
            .ok()?;
        let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&out.stderr));
        let text = text.trim();
        (!text.is_empty()).then(|| text.lines().last().unwrap_or(text).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::launcher::ResourceLimits;
    use crate::types::{Chunk, ChunkKind};
    use std::path::PathBuf;

    fn spec(files_only: bool) -> WorkerSpec {
        let path = Path::new("/mnt/nas/photos");
        let chunk = if files_only {
            Chunk::direct_files(path, "nas", ChunkKind::Root, 0)
        } else {
            Chunk::subtree(path, "nas", ChunkKind::TopLevel, 0)
        };
        WorkerSpec {
            worker_id: "chunkscan-abc-1-photos".to_string(),
            chunk,
            store_path: PathBuf::from("/srv/state/scan.db"),
            concurrency: 8,
            limits: ResourceLimits {
                cpus: 2.0,
                memory_bytes: 4 * 1024 * 1024 * 1024,
                nofile: 65536,
            },
        }
    }

    #[test]
    fn run_args_mount_chunk_read_only_and_store_writable() {
        let launcher = ContainerLauncher::new("docker", "chunkscan:latest");
        let args = launcher.run_args(&spec(false)).unwrap();
        let joined = args.join(" ");
        assert!(joined.starts_with("run -d --name chunkscan-abc-1-photos"));
        assert!(joined.contains("-v /mnt/nas/photos:/mnt/nas/photos:ro"));
        assert!(joined.contains("-v /srv/state:/data"));
        assert!(joined.contains("--cpus 2.00"));
        assert!(joined.contains("--memory 4294967296"));
        assert!(joined.contains("--ulimit nofile=65536:65536"));
        assert!(joined.ends_with(
            "chunkscan:latest chunkscan worker /mnt/nas/photos nas --db /data/scan.db --concurrency 8"
        ));
    }

    #[test]
    fn run_args_bind_host_store_dir_when_set() {
        let launcher = ContainerLauncher::new("docker", "chunkscan:latest")
            .with_host_store_dir(Some(PathBuf::from("/volume1/scans")));
        let joined = launcher.run_args(&spec(false)).unwrap().join(" ");
        assert!(joined.contains("-v /volume1/scans:/data"));
        assert!(!joined.contains("/srv/state"));
        assert!(joined.contains("--db /data/scan.db"));
    }

    #[test]
    fn call_returns_status_and_output() {
        let launcher = ContainerLauncher::new("sh", "img");
        let out = launcher
            .call(vec![
                "-c".to_string(),
                "echo out; echo err >&2; exit 3".to_string(),
            ])
            .unwrap();
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&out.stdout), "out\n");
        assert_eq!(String::from_utf8_lossy(&out.stderr), "err\n");
    }

    #[test]
    fn call_over_timeout_kills_and_reaps_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let launcher = ContainerLauncher {
            call_timeout: Duration::from_secs(1),
            ..ContainerLauncher::new("sh", "img")
        };
        let started = Instant::now();
        let err = launcher
            .call(vec![
                "-c".to_string(),
                format!("echo $$ > {}; exec sleep 300", pid_file.display()),
            ])
            .unwrap_err();
        assert!(format!("{err:#}").contains("did not finish within"));
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid: libc::pid_t = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        // Killed and waited for: the pid no longer exists.
        assert_ne!(unsafe { libc::kill(pid, 0) }, 0);
    }

    #[test]
    fn run_args_pass_files_only() {
        let launcher = ContainerLauncher::new("podman", "img");
        let args = launcher.run_args(&spec(true)).unwrap();
        assert_eq!(args.last().map(String::as_str), Some("--files-only"));
    }

    #[test]
    fn inspect_output_maps_states() {
        let json = r#"[
            {"Name": "/w-1", "State": {"Status": "running", "Running": true, "ExitCode": 0}},
            {"Name": "/w-2", "State": {"Status": "exited", "Running": false, "ExitCode": 0}},
            {"Name": "/w-3", "State": {"Status": "exited", "Running": false, "ExitCode": 2}},
            {"Name": "/w-4", "State": {"Status": "exited", "Running": false, "ExitCode": 0, "OOMKilled": true}}
        ]"#;
        let map = parse_inspect_output(json).unwrap();
        assert_eq!(map["w-1"], WorkerStatus::Running);
        assert_eq!(map["w-2"], WorkerStatus::Exited(0));
        assert_eq!(map["w-3"], WorkerStatus::Exited(2));
        assert_eq!(map["w-4"], WorkerStatus::Exited(137));
        assert!(!map.contains_key("w-5"));
    }
}
