//! Lifecycle of the server-under-test process
//!
//! The controller owns at most one child at a time. The child is spawned as the leader of its
//! own process group, so teardown can reach the worker processes it forks without matching
//! processes by name. Short-lived benchmark tools get the same treatment through
//! [`run_in_group`].

use crate::health::{HealthProbe, Readiness};
use crate::launch::LaunchSpec;
use crate::{Result, RuntimeError};
use async_trait::async_trait;
use grid_core::{safe_model_name, ServerConfig};
use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Control surface the sweep uses to drive a server
#[async_trait]
pub trait ServerControl: Send {
    /// Launch the server. A running instance is stopped first.
    async fn start(&mut self, spec: &LaunchSpec) -> Result<()>;

    /// Poll until the server answers, exits, or the startup timeout elapses
    async fn await_ready(&mut self) -> Readiness;

    /// Terminate the server and everything it spawned. Best effort, never fails.
    async fn stop(&mut self);

    /// Remove compiled artifacts left by a previous configuration
    async fn purge_cache(&mut self) -> Result<()>;

    /// Base URL clients should target
    fn base_url(&self) -> String;

    /// Captured output of the current or last server, if it was logged to a file
    fn server_log(&self) -> Option<String>;
}

/// Owns the server child process
pub struct ProcessController {
    config: ServerConfig,
    log_dir: Option<PathBuf>,
    health: HealthProbe,
    child: Option<Child>,
    log_path: Option<PathBuf>,
    started_at: Option<Instant>,
}

impl ProcessController {
    /// Create a controller. With a log directory, server output goes to
    /// `<log_dir>/<model>_tp<tp>_server.log`; otherwise it is inherited.
    pub fn new(config: ServerConfig, log_dir: Option<PathBuf>) -> Result<Self> {
        let health =
            HealthProbe::new(&config.base_url(), &config.ready_path, config.poll_timeout())?;
        Ok(Self {
            config,
            log_dir,
            health,
            child: None,
            log_path: None,
            started_at: None,
        })
    }

    /// Log file name for a launch
    pub fn log_file_name(spec: &LaunchSpec) -> String {
        format!("{}_tp{}_server.log", safe_model_name(&spec.model), spec.tp)
    }

    /// Check if the child is still alive
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(_))) | Some(Err(_)) | None => false,
        }
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.map(|start| start.elapsed())
    }

    /// Wait until the child exits on its own, returning its exit code
    pub async fn wait_for_exit(&mut self) -> Option<i32> {
        loop {
            match self.child.as_mut().map(|c| c.try_wait()) {
                Some(Ok(None)) => {}
                Some(Ok(Some(status))) => return status.code(),
                Some(Err(e)) => {
                    warn!("Failed to poll server process: {}", e);
                    return None;
                }
                None => return None,
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    fn spawn(&mut self, spec: &LaunchSpec) -> Result<Child> {
        let mut command = Command::new(&self.config.command);
        command
            .args(spec.serve_args(&self.config.host, self.config.port))
            .envs(spec.env_pairs())
            .stdin(Stdio::null());

        match &self.log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(Self::log_file_name(spec));
                let file = File::create(&path)?;
                command
                    .stdout(Stdio::from(file.try_clone()?))
                    .stderr(Stdio::from(file));
                self.log_path = Some(path);
            }
            None => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
                self.log_path = None;
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command.spawn().map_err(|e| {
            RuntimeError::Startup(format!(
                "Failed to spawn '{}': {}",
                self.config.command, e
            ))
        })
    }

    async fn poll_until_ready(&mut self) -> Readiness {
        loop {
            match self.child.as_mut().map(|c| c.try_wait()) {
                Some(Ok(None)) => {}
                Some(Ok(Some(status))) => return Readiness::Died { code: status.code() },
                Some(Err(e)) => {
                    warn!("Failed to poll server process: {}", e);
                    return Readiness::Died { code: None };
                }
                None => return Readiness::Died { code: None },
            }

            if self.health.check().await {
                return Readiness::Ready;
            }

            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}

#[async_trait]
impl ServerControl for ProcessController {
    async fn start(&mut self, spec: &LaunchSpec) -> Result<()> {
        if self.child.is_some() {
            self.stop().await;
        }

        info!(
            "Starting server: {} (tp={}, util={}, max_num_seqs={}, max_model_len={})",
            spec.model, spec.tp, spec.util, spec.max_num_seqs, spec.max_model_len
        );
        debug!(
            "Command: {} {}",
            self.config.command,
            spec.serve_args(&self.config.host, self.config.port).join(" ")
        );

        let child = self.spawn(spec)?;
        debug!("Server spawned with pid {}", child.id());
        self.child = Some(child);
        self.started_at = Some(Instant::now());
        Ok(())
    }

    async fn await_ready(&mut self) -> Readiness {
        let startup_timeout = self.config.startup_timeout();
        debug!("Polling {} for up to {:?}", self.health.url(), startup_timeout);
        match timeout(startup_timeout, self.poll_until_ready()).await {
            Ok(Readiness::Ready) => {
                info!(
                    "Server ready after {:?}, settling for {:?}",
                    self.uptime().unwrap_or_default(),
                    self.config.settle_delay()
                );
                tokio::time::sleep(self.config.settle_delay()).await;
                Readiness::Ready
            }
            Ok(other) => {
                error!("Server {} before becoming ready", other);
                other
            }
            Err(_) => {
                error!("Server did not become ready within {:?}", startup_timeout);
                Readiness::TimedOut
            }
        }
    }

    async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();
        info!("Stopping server (pid {})", pid);

        #[cfg(unix)]
        signal_child(pid);

        let shutdown = timeout(self.config.shutdown_timeout(), async {
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => return Ok(()),
                    Ok(None) => tokio::time::sleep(Duration::from_millis(100)).await,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        let exited = match shutdown {
            Ok(Ok(())) => {
                info!("Server stopped gracefully");
                true
            }
            Ok(Err(e)) => {
                error!("Error during graceful shutdown: {}", e);
                false
            }
            Err(_) => {
                warn!("Graceful shutdown timed out, forcing kill");
                false
            }
        };

        // Workers forked by the server share its group and may outlive the leader
        #[cfg(unix)]
        kill_group(pid);

        if !exited {
            if let Err(e) = child.kill() {
                debug!("Kill after group sweep: {}", e);
            }
        }
        if let Err(e) = child.wait() {
            error!("Failed to reap server process: {}", e);
        }

        self.started_at = None;
        tokio::time::sleep(self.config.teardown_settle()).await;
    }

    async fn purge_cache(&mut self) -> Result<()> {
        let Some(dir) = self.config.effective_cache_dir() else {
            warn!("No home directory, skipping compile cache purge");
            return Ok(());
        };
        if tokio::fs::metadata(&dir).await.is_ok() {
            info!("Purging compile cache {}", dir.display());
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    fn base_url(&self) -> String {
        self.config.base_url()
    }

    fn server_log(&self) -> Option<String> {
        let path = self.log_path.as_ref()?;
        match std::fs::read(path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!("Failed to read server log {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(unix)]
fn signal_child(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => debug!("Sent SIGTERM to {}", pid),
        Err(e) => warn!("Failed to send SIGTERM to {}: {}", pid, e),
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) => debug!("Sent SIGKILL to process group {}", pgid),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

/// Kills a process group when dropped
struct GroupGuard {
    pgid: Option<u32>,
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pgid) = self.pgid.take() {
                kill_group(pgid);
            }
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!("Failed to read tool output: {}", e);
    }
    buf
}

async fn collect(task: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Run a benchmark tool as the leader of a fresh process group and collect its output.
///
/// The whole group is killed once the tool exits, and also when the returned future is
/// dropped before completion, so engine workers the tool forked never outlive it.
pub(crate) async fn run_in_group(
    mut command: tokio::process::Command,
) -> std::io::Result<std::process::Output> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn()?;
    let guard = GroupGuard { pgid: child.id() };
    let stdout = child.stdout.take().map(|out| tokio::spawn(read_all(out)));
    let stderr = child.stderr.take().map(|err| tokio::spawn(read_all(err)));

    let status = child.wait().await?;
    // Workers left behind still hold the pipes open
    drop(guard);

    Ok(std::process::Output {
        status,
        stdout: collect(stdout).await,
        stderr: collect(stderr).await,
    })
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!("ProcessController dropped with running server, killing process group");

            #[cfg(unix)]
            kill_group(child.id());

            if let Err(e) = child.kill() {
                debug!("Kill during cleanup: {}", e);
            }
            let _ = child.wait();
        }
    }
}
