//! Task Gateway - turns untrusted requests into supervised, bounded executions
//!
//! Features:
//! - Allow-list validation before anything is queued
//! - Bounded concurrency (semaphore) and bounded queue of pending tasks
//! - Per-task locking; only snapshots ever leave the gateway
//! - Cancellation with a bounded wait
//! - Bounded retention of finished tasks
//!
//! Locks are never held across `.await`, and a task's record lock is never
//! held together with the registry lock.

use crate::executor::{
    BrowserDriver, BrowserExecutor, BrowserExecutorConfig, CapturedOutput, CommandPolicy,
    EchoDriver, ExecutionOutcome, Executor, Job, LocalExecutor, LocalExecutorConfig,
};
use crate::state::TaskStatus;
use crate::task::{FailureReason, Task, TaskFailure, TaskId, TaskKind, TaskRequest, TaskResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskgate_foundation::{mask_sensitive, Error, GatewayConfig, Result};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Extra time `cancel` waits past the grace period before forcing the state
const SETTLE_MARGIN: Duration = Duration::from_millis(250);

/// Live state of one task, owned by the gateway
struct TaskRecord {
    task: Task,
    job: Job,
    cancel: CancellationToken,
    status_tx: watch::Sender<TaskStatus>,
}

impl TaskRecord {
    fn new(task: Task, job: Job) -> Self {
        let (status_tx, _) = watch::channel(task.status);
        Self {
            task,
            job,
            cancel: CancellationToken::new(),
            status_tx,
        }
    }

    /// Apply a transition and notify waiters if it took effect
    fn apply(&mut self, transition: impl FnOnce(&mut Task) -> bool) -> bool {
        let changed = transition(&mut self.task);
        if changed {
            self.status_tx.send_replace(self.task.status);
        }
        changed
    }
}

type SharedRecord = Arc<Mutex<TaskRecord>>;

/// Task counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Command gateway - sole owner of the task registry
#[derive(Clone)]
pub struct TaskGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    /// All retained tasks by ID
    tasks: RwLock<HashMap<TaskId, SharedRecord>>,

    /// Finished task IDs, oldest first
    finished: Mutex<VecDeque<TaskId>>,

    /// Tasks accepted but not yet started or cancelled
    pending: AtomicUsize,

    /// Execution slots
    slots: Arc<Semaphore>,

    policy: CommandPolicy,

    local: Arc<LocalExecutor>,

    browser: Arc<BrowserExecutor>,

    config: GatewayConfig,
}

impl TaskGateway {
    /// Create a gateway with the placeholder browser driver
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Self::with_driver(config, Arc::new(EchoDriver))
    }

    /// Create a gateway with a specific browser-automation driver
    pub fn with_driver(config: GatewayConfig, driver: Arc<dyn BrowserDriver>) -> Result<Self> {
        config.validate()?;
        let policy = CommandPolicy::from_config(&config)?;

        info!(
            "Task gateway ready: {} allowed commands, {} slots, timeout {:.1}s, driver '{}'",
            config.allowed_commands.len(),
            config.max_concurrent,
            config.timeout().as_secs_f64(),
            driver.name()
        );

        Ok(Self {
            inner: Arc::new(GatewayInner {
                tasks: RwLock::new(HashMap::new()),
                finished: Mutex::new(VecDeque::new()),
                pending: AtomicUsize::new(0),
                slots: Arc::new(Semaphore::new(config.max_concurrent)),
                policy,
                local: Arc::new(LocalExecutor::with_config(LocalExecutorConfig::from(
                    &config,
                ))),
                browser: Arc::new(BrowserExecutor::new(
                    driver,
                    BrowserExecutorConfig::from(&config),
                )),
                config,
            }),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.inner.policy
    }

    /// Validate and enqueue a request; returns without waiting for execution
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: TaskRequest) -> Result<TaskId> {
        let (kind, job) = match request {
            TaskRequest::Command(raw) => {
                let parsed = self.inner.policy.parse(&raw)?;
                (TaskKind::ShellCommand { raw_text: raw }, Job::Shell(parsed))
            }
            TaskRequest::Browser(instruction) => {
                if instruction.is_null() {
                    return Err(Error::invalid_command("browser task must not be empty"));
                }
                (
                    TaskKind::BrowserAutomation {
                        instruction: instruction.clone(),
                    },
                    Job::Browser(instruction),
                )
            }
        };

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Internal("task gateway requires a tokio runtime".to_string()))?;

        self.inner.reserve_pending()?;

        let task = Task::new(kind);
        let task_id = task.id;
        match &task.kind {
            TaskKind::ShellCommand { raw_text } => {
                info!("Submitted task {} (shell): {}", task_id, raw_text)
            }
            TaskKind::BrowserAutomation { instruction } => info!(
                "Submitted task {} (browser): {}",
                task_id,
                mask_sensitive(instruction)
            ),
        }

        let record = Arc::new(Mutex::new(TaskRecord::new(task, job)));
        self.inner
            .tasks
            .write()
            .insert(task_id, Arc::clone(&record));

        runtime.spawn(supervise(Arc::clone(&self.inner), record));

        Ok(task_id)
    }

    /// Get a snapshot of a task
    pub fn status(&self, task_id: TaskId) -> Result<Task> {
        let record = self.inner.record(task_id)?;
        let snapshot = record.lock().task.clone();
        Ok(snapshot)
    }

    /// Cancel a task
    ///
    /// Pending tasks are cancelled immediately. Running tasks are signalled and
    /// waited on for at most the grace period (plus a short margin), then marked
    /// cancelled regardless. Terminal tasks are returned unchanged.
    pub async fn cancel(&self, task_id: TaskId) -> Result<Task> {
        let record = self.inner.record(task_id)?;

        let mut status_rx = {
            let mut r = record.lock();
            let status = r.task.status;
            match status {
                TaskStatus::Pending => {
                    r.apply(Task::cancel);
                    r.cancel.cancel();
                    let snapshot = r.task.clone();
                    drop(r);

                    self.inner.release_pending();
                    self.inner.retire(task_id);
                    info!("Cancelled pending task {}", task_id);
                    return Ok(snapshot);
                }
                TaskStatus::Running => {
                    r.cancel.cancel();
                    r.status_tx.subscribe()
                }
                _ => {
                    debug!("Task {} already {}, nothing to cancel", task_id, status);
                    return Ok(r.task.clone());
                }
            }
        };

        info!("Cancelling running task {}", task_id);

        let limit = self.inner.config.cancel_grace() + SETTLE_MARGIN;
        let settled = matches!(
            tokio::time::timeout(limit, status_rx.wait_for(|s| s.is_terminal())).await,
            Ok(Ok(_))
        );

        if !settled {
            let forced = record.lock().apply(Task::cancel);
            if forced {
                warn!(
                    "Task {} did not stop within {:.1}s, marked cancelled",
                    task_id,
                    limit.as_secs_f64()
                );
                self.inner.retire(task_id);
            }
        }

        let snapshot = record.lock().task.clone();
        Ok(snapshot)
    }

    /// Wait for a task to reach a terminal state, or until `timeout` elapses
    ///
    /// Returns the latest snapshot either way.
    pub async fn wait(&self, task_id: TaskId, timeout: Option<Duration>) -> Result<Task> {
        let record = self.inner.record(task_id)?;
        let mut status_rx = record.lock().status_tx.subscribe();

        let finished = async move { status_rx.wait_for(|s| s.is_terminal()).await.is_ok() };
        match timeout {
            Some(limit) => {
                let _ = tokio::time::timeout(limit, finished).await;
            }
            None => {
                finished.await;
            }
        }

        let snapshot = record.lock().task.clone();
        Ok(snapshot)
    }

    /// Snapshots of every retained task, oldest submission first
    pub fn list(&self) -> Vec<Task> {
        let records: Vec<SharedRecord> = self.inner.tasks.read().values().cloned().collect();
        let mut tasks: Vec<Task> = records.iter().map(|r| r.lock().task.clone()).collect();
        tasks.sort_by_key(|t| t.submitted_at);
        tasks
    }

    /// Count tasks by status
    pub fn stats(&self) -> GatewayStats {
        let records: Vec<SharedRecord> = self.inner.tasks.read().values().cloned().collect();
        let mut stats = GatewayStats::default();
        for record in &records {
            let status = record.lock().task.status;
            stats.total += 1;
            match status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Number of retained tasks
    pub fn len(&self) -> usize {
        self.inner.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every active task; returns the ones that ended up cancelled
    pub async fn shutdown(&self) -> Vec<TaskId> {
        let active: Vec<TaskId> = self
            .list()
            .into_iter()
            .filter(Task::is_active)
            .map(|t| t.id)
            .collect();

        let results =
            futures::future::join_all(active.iter().map(|task_id| self.cancel(*task_id))).await;

        let cancelled: Vec<TaskId> = active
            .into_iter()
            .zip(results)
            .filter_map(|(task_id, result)| match result {
                Ok(task) if task.status == TaskStatus::Cancelled => Some(task_id),
                _ => None,
            })
            .collect();

        info!("Shutdown cancelled {} tasks", cancelled.len());
        cancelled
    }
}

impl GatewayInner {
    fn record(&self, task_id: TaskId) -> Result<SharedRecord> {
        self.tasks
            .read()
            .get(&task_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))
    }

    fn reserve_pending(&self) -> Result<()> {
        let max = self.config.max_pending;
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                warn!("Rejected submission: {} tasks already pending", max);
                Error::QueueFull(max)
            })
    }

    fn release_pending(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Record a finished task and evict the oldest beyond the retention limit
    fn retire(&self, task_id: TaskId) {
        let evicted: Vec<TaskId> = {
            let mut finished = self.finished.lock();
            finished.push_back(task_id);
            let excess = finished.len().saturating_sub(self.config.retain_finished);
            finished.drain(..excess).collect()
        };

        if !evicted.is_empty() {
            let mut tasks = self.tasks.write();
            for old in &evicted {
                tasks.remove(old);
            }
            debug!("Evicted {} finished tasks", evicted.len());
        }
    }

    /// Apply an execution outcome; a no-op if the task already finished
    fn finalize(&self, record: &SharedRecord, outcome: ExecutionOutcome) {
        let (task_id, changed, status) = {
            let mut r = record.lock();
            let is_shell = r.task.kind.is_shell();
            let changed = r.apply(|task| apply_outcome(task, outcome, is_shell));
            (r.task.id, changed, r.task.status)
        };

        if !changed {
            debug!("Task {} already finished, dropping late outcome", task_id);
            return;
        }

        match status {
            TaskStatus::Failed => warn!("Task {} failed", task_id),
            _ => info!("Task {} {}", task_id, status.display_name().to_lowercase()),
        }
        self.retire(task_id);
    }
}

fn partial_result(is_shell: bool, output: CapturedOutput, exit_code: Option<i32>) -> TaskResult {
    if is_shell {
        TaskResult::Shell {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
        }
    } else {
        TaskResult::Browser {
            data: serde_json::Value::Null,
        }
    }
}

fn apply_outcome(task: &mut Task, outcome: ExecutionOutcome, is_shell: bool) -> bool {
    match outcome {
        ExecutionOutcome::Exited {
            exit_code: Some(0),
            output,
        } => task.complete(partial_result(is_shell, output, Some(0))),
        ExecutionOutcome::Exited { exit_code, output } => {
            let message = match exit_code {
                Some(code) => format!("process exited with code {}", code),
                None => "process was terminated by a signal".to_string(),
            };
            task.fail(
                TaskFailure::new(FailureReason::ExecutionFailed, message),
                Some(partial_result(is_shell, output, exit_code)),
            )
        }
        ExecutionOutcome::Browser(data) => task.complete(TaskResult::Browser { data }),
        ExecutionOutcome::TimedOut { output } => task.fail(
            TaskFailure::new(FailureReason::TimeoutExceeded, "task exceeded its time limit"),
            Some(partial_result(is_shell, output, None)),
        ),
        ExecutionOutcome::OutputTooLarge { output } => task.fail(
            TaskFailure::new(
                FailureReason::OutputTooLarge,
                "task output exceeded the size limit",
            ),
            Some(partial_result(is_shell, output, None)),
        ),
        ExecutionOutcome::Cancelled => task.cancel(),
        ExecutionOutcome::Failed { message, detail } => {
            warn!("Task {} could not run: {}", task.id, detail);
            task.fail(
                TaskFailure::new(FailureReason::ExecutionFailed, message),
                Some(partial_result(is_shell, CapturedOutput::default(), None)),
            )
        }
    }
}

/// Per-task supervisor: wait for a slot, run the unit, record the outcome
async fn supervise(inner: Arc<GatewayInner>, record: SharedRecord) {
    let (task_id, job, cancel) = {
        let r = record.lock();
        (r.task.id, r.job.clone(), r.cancel.clone())
    };

    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Task {} cancelled before it got a slot", task_id);
            return;
        }
        permit = Arc::clone(&inner.slots).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                error!("Execution slots closed, task {} cannot start", task_id);
                if record.lock().apply(Task::cancel) {
                    inner.release_pending();
                    inner.retire(task_id);
                }
                return;
            }
        },
    };

    if !record.lock().apply(Task::start) {
        debug!("Task {} no longer pending, not starting", task_id);
        return;
    }
    inner.release_pending();

    let executor: Arc<dyn Executor> = match &job {
        Job::Shell(_) => Arc::clone(&inner.local) as Arc<dyn Executor>,
        Job::Browser(_) => Arc::clone(&inner.browser) as Arc<dyn Executor>,
    };
    info!("Started task {} on {} executor", task_id, executor.name());

    // Own tokio task per unit: a panic in there fails this task only
    let unit = tokio::spawn(async move { executor.execute(task_id, &job, cancel).await });
    let outcome = match unit.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Execution unit of task {} crashed: {}", task_id, e);
            ExecutionOutcome::failed("execution unit crashed", e.to_string())
        }
    };

    drop(permit);
    inner.finalize(&record, outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> GatewayConfig {
        GatewayConfig::default()
            .with_allowed_commands(["ls", "pwd", "echo", "sleep"])
            .with_timeout(Duration::from_secs(10))
            .with_cancel_grace(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_rejected_command_creates_nothing() {
        let gateway = TaskGateway::new(config()).unwrap();

        for raw in ["rm -rf /", "ls; rm -rf /", "echo $(whoami)", ""] {
            let err = gateway.submit(TaskRequest::Command(raw.into())).unwrap_err();
            assert!(matches!(err, Error::InvalidCommand(_)), "{:?}", raw);
        }
        assert!(gateway.is_empty());
    }

    #[tokio::test]
    async fn test_null_browser_task_rejected() {
        let gateway = TaskGateway::new(config()).unwrap();
        let err = gateway
            .submit(TaskRequest::Browser(serde_json::Value::Null))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCommand(_)));
        assert_eq!(gateway.len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let gateway = TaskGateway::new(config()).unwrap();
        let missing = TaskId::new();

        assert!(matches!(gateway.status(missing), Err(Error::NotFound(_))));
        assert!(matches!(
            gateway.cancel(missing).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            gateway.wait(missing, None).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_until_slot_frees() {
        let gateway = TaskGateway::new(config().with_max_concurrent(1)).unwrap();

        let busy = gateway
            .submit(TaskRequest::Command("sleep 5".into()))
            .unwrap();
        let queued = gateway
            .submit(TaskRequest::Command("echo queued".into()))
            .unwrap();

        assert_eq!(gateway.status(queued).unwrap().status, TaskStatus::Pending);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(gateway.status(busy).unwrap().status, TaskStatus::Running);
        assert_eq!(gateway.status(queued).unwrap().status, TaskStatus::Pending);

        gateway.cancel(busy).await.unwrap();
        let done = gateway
            .wait(queued, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_pending_never_starts() {
        let gateway = TaskGateway::new(config().with_max_concurrent(1)).unwrap();

        let busy = gateway
            .submit(TaskRequest::Command("sleep 5".into()))
            .unwrap();
        let queued = gateway
            .submit(TaskRequest::Command("echo never".into()))
            .unwrap();

        let cancelled = gateway.cancel(queued).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.started_at.is_none());
        assert!(cancelled.finished_at.is_some());

        gateway.cancel(busy).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let after = gateway.status(queued).unwrap();
        assert_eq!(after, cancelled);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let gateway = TaskGateway::new(config()).unwrap();
        let task_id = gateway
            .submit(TaskRequest::Command("sleep 5".into()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let first = gateway.cancel(task_id).await.unwrap();
        let second = gateway.cancel(task_id).await.unwrap();

        assert_eq!(first.status, TaskStatus::Cancelled);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_queue_full() {
        let gateway = TaskGateway::new(config().with_max_concurrent(1).with_max_pending(1)).unwrap();

        let busy = gateway
            .submit(TaskRequest::Command("sleep 5".into()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let queued = gateway
            .submit(TaskRequest::Command("echo one".into()))
            .unwrap();
        let err = gateway
            .submit(TaskRequest::Command("echo two".into()))
            .unwrap_err();
        assert!(matches!(err, Error::QueueFull(1)));
        assert_eq!(gateway.len(), 2);

        // Cancelling the queued task frees its place
        gateway.cancel(queued).await.unwrap();
        assert!(gateway
            .submit(TaskRequest::Command("echo three".into()))
            .is_ok());

        let cancelled = gateway.shutdown().await;
        assert!(cancelled.contains(&busy));
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest_finished() {
        let gateway = TaskGateway::new(config().with_retain_finished(2)).unwrap();

        let mut ids = Vec::new();
        for i in 0..3 {
            let task_id = gateway
                .submit(TaskRequest::Command(format!("echo {}", i)))
                .unwrap();
            gateway
                .wait(task_id, Some(Duration::from_secs(5)))
                .await
                .unwrap();
            ids.push(task_id);
        }

        assert!(matches!(gateway.status(ids[0]), Err(Error::NotFound(_))));
        assert!(gateway.status(ids[1]).is_ok());
        assert!(gateway.status(ids[2]).is_ok());
        assert_eq!(gateway.len(), 2);
    }

    #[tokio::test]
    async fn test_stats_and_list() {
        let gateway = TaskGateway::new(config()).unwrap();

        let ok = gateway.submit(TaskRequest::Command("echo a".into())).unwrap();
        let browser = gateway
            .submit(TaskRequest::Browser(json!({ "action": "open" })))
            .unwrap();
        gateway.wait(ok, Some(Duration::from_secs(5))).await.unwrap();
        gateway
            .wait(browser, Some(Duration::from_secs(5)))
            .await
            .unwrap();

        let stats = gateway.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 2);

        let listed: Vec<TaskId> = gateway.list().into_iter().map(|t| t.id).collect();
        assert_eq!(listed, vec![ok, browser]);
    }

    #[tokio::test]
    async fn test_stats_counts_each_status() {
        let gateway = TaskGateway::new(config().with_max_concurrent(1)).unwrap();

        let failed = gateway
            .submit(TaskRequest::Command("ls /definitely/not/here".into()))
            .unwrap();
        gateway
            .wait(failed, Some(Duration::from_secs(5)))
            .await
            .unwrap();

        gateway
            .submit(TaskRequest::Command("sleep 5".into()))
            .unwrap();
        gateway
            .submit(TaskRequest::Command("echo queued".into()))
            .unwrap();
        let dropped = gateway
            .submit(TaskRequest::Command("echo dropped".into()))
            .unwrap();
        gateway.cancel(dropped).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(
            gateway.stats(),
            GatewayStats {
                total: 4,
                pending: 1,
                running: 1,
                completed: 0,
                failed: 1,
                cancelled: 1,
            }
        );

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_active() {
        let gateway = TaskGateway::new(config().with_max_concurrent(1)).unwrap();
        let running = gateway
            .submit(TaskRequest::Command("sleep 5".into()))
            .unwrap();
        let queued = gateway
            .submit(TaskRequest::Command("sleep 5".into()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut cancelled = gateway.shutdown().await;
        cancelled.sort_by_key(|id| id.0);
        let mut expected = vec![running, queued];
        expected.sort_by_key(|id| id.0);

        assert_eq!(cancelled, expected);
        assert_eq!(gateway.stats().cancelled, 2);
    }

    #[test]
    fn test_submit_outside_runtime() {
        let gateway = TaskGateway::new(config()).unwrap();
        let err = gateway
            .submit(TaskRequest::Command("ls".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(gateway.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(TaskGateway::new(config().with_max_concurrent(0)).is_err());
        assert!(TaskGateway::new(config().with_allowed_commands(["ls|sh"])).is_err());
    }
}
