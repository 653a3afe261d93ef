//! Local executor - runs shell tasks as host processes
//!
//! Features:
//! - Direct program execution (no shell in between)
//! - Own process group per task on Unix, so the whole tree is killed together
//! - Concurrent stdout/stderr capture against one shared byte budget
//! - Hard wall-clock timeout
//! - Cancellation with SIGTERM -> grace period -> SIGKILL escalation

use crate::executor::shell_policy::ParsedCommand;
use crate::executor::{CapturedOutput, ExecutionOutcome, Executor, Job};
use crate::task::TaskId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskgate_foundation::GatewayConfig;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pipe read size
const READ_CHUNK: usize = 8 * 1024;

/// How long pipes may take to drain once the process is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Fallback poll interval while waiting for a process to exit
#[cfg(unix)]
const EXIT_POLL: Duration = Duration::from_millis(100);

/// Local executor configuration
#[derive(Debug, Clone)]
pub struct LocalExecutorConfig {
    /// Hard wall-clock limit
    pub timeout: Duration,
    /// Combined stdout + stderr cap
    pub max_output_bytes: usize,
    /// Time between SIGTERM and SIGKILL on cancel
    pub cancel_grace: Duration,
    /// Working directory for spawned processes
    pub working_dir: Option<PathBuf>,
    /// Put each task in its own process group (Unix only)
    pub kill_process_group: bool,
}

impl Default for LocalExecutorConfig {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for LocalExecutorConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_output_bytes: config.max_output_bytes,
            cancel_grace: config.cancel_grace(),
            working_dir: config.working_dir.clone(),
            kill_process_group: true,
        }
    }
}

/// Byte budget shared by the stdout and stderr readers
struct OutputBudget {
    limit: usize,
    used: AtomicUsize,
    exceeded: CancellationToken,
}

impl OutputBudget {
    fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit,
            used: AtomicUsize::new(0),
            exceeded: CancellationToken::new(),
        })
    }

    /// Reserve `n` bytes; returns how many of them fit under the limit
    fn reserve(&self, n: usize) -> usize {
        let before = self.used.fetch_add(n, Ordering::SeqCst);
        let room = self.limit.saturating_sub(before);
        if n > room {
            self.exceeded.cancel();
        }
        n.min(room)
    }

    fn is_exceeded(&self) -> bool {
        self.exceeded.is_cancelled()
    }
}

async fn capture<R>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>, budget: Arc<OutputBudget>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let fit = budget.reserve(n);
        sink.lock().extend_from_slice(&chunk[..fit]);
        if fit < n {
            break;
        }
    }
}

/// Signal target for a spawned process
struct ProcessHandle {
    pid: Option<u32>,
    group: bool,
}

impl ProcessHandle {
    #[cfg(unix)]
    fn signal(&self, signal: libc::c_int) {
        let Some(pid) = self.pid else {
            return;
        };
        let target = if self.group { -(pid as i32) } else { pid as i32 };
        // SAFETY: kill(2) takes plain integers and touches no memory
        let rc = unsafe { libc::kill(target, signal) };
        if rc != 0 {
            debug!(
                "kill({}, {}) failed: {}",
                target,
                signal,
                std::io::Error::last_os_error()
            );
        }
    }

    /// Ask the process (group) to stop
    fn request_stop(&self) {
        #[cfg(unix)]
        self.signal(libc::SIGTERM);
    }

    /// Kill whatever is left of the process group
    ///
    /// Only called while the leader is still unreaped, so the group id
    /// cannot have been handed to another process.
    fn sweep_group(&self) {
        #[cfg(unix)]
        {
            if self.group {
                self.signal(libc::SIGKILL);
            }
        }
    }

    /// Resolve once the process has exited, leaving it unreaped
    #[cfg(unix)]
    async fn exited(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        let mut sigchld =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::child()).ok();

        while !leader_exited(pid) {
            match sigchld.as_mut() {
                Some(stream) => {
                    let _ = tokio::time::timeout(EXIT_POLL, stream.recv()).await;
                }
                None => tokio::time::sleep(EXIT_POLL).await,
            }
        }
    }
}

/// Whether `pid` has exited; never reaps it
#[cfg(unix)]
fn leader_exited(pid: u32) -> bool {
    // SAFETY: siginfo_t is plain data; all-zero is a valid value
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    // SAFETY: waitid only writes into `info`
    let rc = unsafe {
        libc::waitid(
            libc::P_PID,
            pid as libc::id_t,
            &mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if rc != 0 {
        // ECHILD: already reaped
        return true;
    }
    // WNOHANG with nothing to report leaves si_pid at zero
    // SAFETY: `info` was filled in by waitid
    unsafe { info.si_pid() != 0 }
}

/// Wait for the child to exit
///
/// On Unix the leader stays a zombie afterwards, so its process group can
/// still be swept safely; `child.wait()` reaps it later.
async fn wait_exit(child: &mut Child, handle: &ProcessHandle) {
    #[cfg(unix)]
    {
        let _ = &child;
        handle.exited().await;
    }
    #[cfg(not(unix))]
    {
        let _ = handle;
        let _ = child.wait().await;
    }
}

enum Ending {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    OutputTooLarge,
    Cancelled,
}

/// Local executor that runs shell tasks directly on the host
pub struct LocalExecutor {
    config: LocalExecutorConfig,
}

impl LocalExecutor {
    /// Create a new local executor
    pub fn new() -> Self {
        Self::with_config(LocalExecutorConfig::default())
    }

    /// Create with configuration
    pub fn with_config(config: LocalExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LocalExecutorConfig {
        &self.config
    }

    /// Stop a process: SIGTERM, wait up to `grace`, then SIGKILL and reap.
    ///
    /// Zero grace skips straight to SIGKILL.
    async fn terminate(&self, child: &mut Child, handle: &ProcessHandle, grace: Duration) {
        if !grace.is_zero() && cfg!(unix) {
            handle.request_stop();
            if tokio::time::timeout(grace, wait_exit(child, handle))
                .await
                .is_ok()
            {
                handle.sweep_group();
                let _ = child.wait().await;
                return;
            }
            warn!(
                "Process {:?} ignored termination for {:.1}s, killing",
                handle.pid,
                grace.as_secs_f64()
            );
        }

        handle.sweep_group();
        if let Err(e) = child.start_kill() {
            debug!("start_kill failed (process likely gone): {}", e);
        }
        let _ = child.wait().await;
    }

    async fn run(
        &self,
        task_id: TaskId,
        command: &ParsedCommand,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            if self.config.kill_process_group {
                cmd.process_group(0);
            }
        }

        debug!("Spawning task {}: {}", task_id, command.display());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = if e.kind() == std::io::ErrorKind::NotFound {
                    "program not found"
                } else {
                    "failed to start process"
                };
                return ExecutionOutcome::failed(
                    message,
                    format!("spawn '{}': {}", command.program, e),
                );
            }
        };

        let handle = ProcessHandle {
            pid: child.id(),
            group: cfg!(unix) && self.config.kill_process_group,
        };

        let budget = OutputBudget::new(self.config.max_output_bytes);
        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(capture(
                stdout,
                Arc::clone(&stdout_buf),
                Arc::clone(&budget),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(capture(
                stderr,
                Arc::clone(&stderr_buf),
                Arc::clone(&budget),
            )));
        }

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        let ending = tokio::select! {
            biased;
            _ = cancel.cancelled() => Ending::Cancelled,
            _ = budget.exceeded.cancelled() => Ending::OutputTooLarge,
            _ = wait_exit(&mut child, &handle) => {
                handle.sweep_group();
                Ending::Exited(child.wait().await)
            }
            _ = &mut deadline => Ending::TimedOut,
        };

        match &ending {
            Ending::Cancelled => {
                info!(
                    "Terminating task {} on cancel (grace {:.1}s)",
                    task_id,
                    self.config.cancel_grace.as_secs_f64()
                );
                self.terminate(&mut child, &handle, self.config.cancel_grace)
                    .await;
            }
            Ending::OutputTooLarge => {
                warn!(
                    "Task {} exceeded output cap of {} bytes, killing",
                    task_id, self.config.max_output_bytes
                );
                self.terminate(&mut child, &handle, Duration::ZERO).await;
            }
            Ending::TimedOut => {
                warn!(
                    "Task {} exceeded timeout of {:.1}s, killing",
                    task_id,
                    self.config.timeout.as_secs_f64()
                );
                self.terminate(&mut child, &handle, Duration::ZERO).await;
            }
            Ending::Exited(_) => {}
        }

        let drain = futures::future::join_all(readers.iter_mut());
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            debug!("Output pipes of task {} did not close, abandoning", task_id);
            for reader in &readers {
                reader.abort();
            }
        }

        let output = CapturedOutput {
            stdout: String::from_utf8_lossy(&stdout_buf.lock()).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_buf.lock()).into_owned(),
        };

        match ending {
            Ending::Cancelled => ExecutionOutcome::Cancelled,
            Ending::TimedOut => ExecutionOutcome::TimedOut { output },
            Ending::OutputTooLarge => ExecutionOutcome::OutputTooLarge { output },
            Ending::Exited(_) if budget.is_exceeded() => {
                ExecutionOutcome::OutputTooLarge { output }
            }
            Ending::Exited(Ok(status)) => ExecutionOutcome::Exited {
                exit_code: status.code(),
                output,
            },
            Ending::Exited(Err(e)) => {
                ExecutionOutcome::failed("failed to wait for process", e.to_string())
            }
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(
        &self,
        task_id: TaskId,
        job: &Job,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        match job {
            Job::Shell(command) => self.run(task_id, command, cancel).await,
            Job::Browser(_) => ExecutionOutcome::failed(
                "unsupported task kind",
                "LocalExecutor can only execute shell jobs",
            ),
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
