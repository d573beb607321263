//! Bounded-concurrency batch scheduler.
//!
//! Fans a per-device command batch out across many devices at once, with a
//! FIFO admission queue, at most `max_threads` devices in flight, cooperative
//! cancellation, progress reporting, and end-of-run statistics. One device's
//! failure never aborts its siblings; it is isolated into that device's
//! [`ExecutionResult`].

mod result;

pub use result::{BatchStats, ExecStatus, ExecutionResult};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, error, info};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::credential::DeviceCredential;
use crate::error::{Result, SchedulerError};
use crate::pool::ConnectionPool;
use crate::transport::Connector;

/// Default bound on concurrently executing devices.
pub const DEFAULT_MAX_THREADS: usize = 5;

/// Commands executed between cancellation checks.
const MICRO_BATCH_SIZE: usize = 5;

/// How long one scheduling-loop iteration waits for a task to complete.
const COMPLETION_POLL: Duration = Duration::from_millis(100);

/// Progress callback: `(completed_count, total_count)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Cooperative cancellation flag shared with in-flight device tasks.
///
/// Checked between command micro-batches and at the top of the scheduling
/// loop; already-started commands run to completion.
#[derive(Clone, Default)]
pub(crate) struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Executes command batches across device fleets with bounded parallelism.
///
/// Single-flight: at most one batch run may be active per executor instance.
pub struct BatchExecutor {
    pool: Arc<ConnectionPool>,
    max_threads: usize,
    running: AtomicBool,
    cancel: CancelToken,
    progress: std::sync::Mutex<Option<ProgressCallback>>,
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl BatchExecutor {
    /// Create an executor with its own pool over `connector`.
    pub fn new(connector: Arc<dyn Connector>, max_threads: usize) -> Self {
        Self::with_pool(Arc::new(ConnectionPool::new(connector)), max_threads)
    }

    /// Create an executor over an existing pool.
    pub fn with_pool(pool: Arc<ConnectionPool>, max_threads: usize) -> Self {
        Self {
            pool,
            max_threads: max_threads.max(1),
            running: AtomicBool::new(false),
            cancel: CancelToken::default(),
            progress: std::sync::Mutex::new(None),
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    /// Install a callback invoked after each device result is recorded.
    pub fn set_progress_callback(&self, callback: impl Fn(usize, usize) + Send + Sync + 'static) {
        *self.progress.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Coarse, eventually-consistent `(completed, total)` snapshot. Safe to
    /// call concurrently with an in-progress run.
    pub fn get_progress(&self) -> (usize, usize) {
        (
            self.completed.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }

    /// Request cancellation of the current run.
    ///
    /// Cooperative: pending devices are dropped with a "cancelled by user"
    /// marker and active tasks stop at their next micro-batch boundary.
    pub fn cancel_all(&self) {
        if self.running.load(Ordering::SeqCst) {
            info!("cancelling batch run");
            self.cancel.cancel();
        }
    }

    /// Execute each device's command list from `command_map` (keyed by ip)
    /// with bounded parallelism, returning the per-device results keyed by
    /// ip.
    ///
    /// Devices without a non-empty command list are skipped silently. Fails
    /// fast with [`SchedulerError::AlreadyRunning`] if a batch is already in
    /// progress on this executor.
    pub async fn run(
        &self,
        devices: &[DeviceCredential],
        command_map: &HashMap<String, Vec<String>>,
    ) -> Result<HashMap<String, ExecutionResult>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning.into());
        }
        // Holds the single-flight slot; releases it even if this future is
        // dropped mid-run.
        let _running = SingleFlightGuard(&self.running);
        self.cancel.reset();

        let mut pending: VecDeque<DeviceCredential> = devices
            .iter()
            .filter(|d| command_map.get(&d.ip).is_some_and(|c| !c.is_empty()))
            .cloned()
            .collect();

        let total = pending.len();
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        info!(
            "starting batch run: {} devices, {} in flight at most",
            total, self.max_threads
        );

        let mut results: HashMap<String, ExecutionResult> = HashMap::with_capacity(total);
        let mut active: JoinSet<ExecutionResult> = JoinSet::new();
        let mut active_ips: HashMap<tokio::task::Id, String> = HashMap::new();

        while !pending.is_empty() || !active.is_empty() {
            if self.cancel.is_cancelled() {
                // Stop admitting; every not-yet-started device gets an
                // explicit marker instead of a success/failure verdict. The
                // markers count as completions so progress still reaches the
                // total.
                for device in pending.drain(..) {
                    self.record(&mut results, ExecutionResult::cancelled(&device.ip));
                }
            } else {
                while active.len() < self.max_threads {
                    let Some(device) = pending.pop_front() else {
                        break;
                    };
                    let commands = command_map.get(&device.ip).cloned().unwrap_or_default();
                    let pool = self.pool.clone();
                    let cancel = self.cancel.clone();
                    let ip = device.ip.clone();
                    debug!("admitting device {ip}");
                    let handle =
                        active.spawn(
                            async move { execute_device(pool, device, commands, cancel).await },
                        );
                    active_ips.insert(handle.id(), ip);
                }
            }

            if active.is_empty() {
                continue;
            }

            match tokio::time::timeout(COMPLETION_POLL, active.join_next_with_id()).await {
                Err(_) => {}
                Ok(None) => {}
                Ok(Some(Ok((id, result)))) => {
                    active_ips.remove(&id);
                    self.record(&mut results, result);
                }
                Ok(Some(Err(join_error))) => {
                    // A crashed task still produces a failed entry so the
                    // device is not silently absent from the results.
                    error!("device task failed: {join_error}");
                    if let Some(ip) = active_ips.remove(&join_error.id()) {
                        let mut result = ExecutionResult::started(&ip);
                        result.error = Some(format!("task failed: {join_error}"));
                        self.record(&mut results, result);
                    }
                }
            }
        }

        self.pool.clear_all().await;
        BatchStats::from_results(&results).log();

        Ok(results)
    }

    fn record(&self, results: &mut HashMap<String, ExecutionResult>, result: ExecutionResult) {
        results.insert(result.ip.clone(), result);
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);
        let callback = self.progress.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(completed, total);
        }
    }
}

/// Releases an executor's single-flight slot on drop, so an abandoned run
/// future cannot leave the executor stuck in the running state.
struct SingleFlightGuard<'a>(&'a AtomicBool);

impl Drop for SingleFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Run one device's command batch: acquire a session, execute in
/// micro-batches with cancellation checks in between, and always close the
/// session and stamp the end time.
async fn execute_device(
    pool: Arc<ConnectionPool>,
    device: DeviceCredential,
    commands: Vec<String>,
    cancel: CancelToken,
) -> ExecutionResult {
    let mut result = ExecutionResult::started(&device.ip);

    match pool.acquire(&device).await {
        Ok(mut session) => {
            let mut failure: Option<String> = None;

            for batch in commands.chunks(MICRO_BATCH_SIZE) {
                if cancel.is_cancelled() {
                    info!("cancellation requested, stopping {} early", device.ip);
                    break;
                }
                match session.execute_many(batch).await {
                    Ok(outputs) => result.commands.extend(outputs),
                    Err(e) => {
                        failure = Some(e.to_string());
                        break;
                    }
                }
            }

            pool.close_session(session).await;

            match failure {
                None => {
                    result.status = ExecStatus::Success;
                    info!("device {} finished", device.ip);
                }
                Some(e) => {
                    result.error = Some(e.clone());
                    error!("device {} failed: {e}", device.ip);
                }
            }
        }
        Err(e) => {
            result.error = Some(e.to_string());
            error!("device {} connection failed: {e}", device.ip);
        }
    }

    result.finished_at = Instant::now();
    result
}
