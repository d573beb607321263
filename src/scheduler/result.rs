//! Per-device execution results and end-of-run statistics.

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;
use log::info;
use tokio::time::Instant;

/// Outcome of one device's command batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Success,
    Failed,
}

/// Result of running a command batch on one device.
///
/// Created at task start, mutated only by the task owning the device, and
/// immutable once published into the batch result mapping.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub ip: String,
    pub status: ExecStatus,

    /// Command output keyed by command, in execution order.
    pub commands: IndexMap<String, String>,

    pub error: Option<String>,
    pub started_at: Instant,
    pub finished_at: Instant,
}

impl ExecutionResult {
    /// A result stamped with the current time, in the not-yet-succeeded
    /// state.
    pub(crate) fn started(ip: &str) -> Self {
        let now = Instant::now();
        Self {
            ip: ip.to_string(),
            status: ExecStatus::Failed,
            commands: IndexMap::new(),
            error: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Marker entry for a device that never ran because the batch was
    /// cancelled.
    pub(crate) fn cancelled(ip: &str) -> Self {
        let mut result = Self::started(ip);
        result.error = Some("cancelled by user".to_string());
        result
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecStatus::Success
    }

    /// Wall time this device's batch took.
    pub fn duration(&self) -> Duration {
        self.finished_at.saturating_duration_since(self.started_at)
    }
}

/// Aggregate statistics for one batch run.
#[derive(Debug, Clone)]
pub struct BatchStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,

    /// Average wall time per device over all recorded results.
    pub average_duration: Duration,

    /// Failed devices with their error text.
    pub failures: Vec<(String, String)>,
}

impl BatchStats {
    pub fn from_results(results: &HashMap<String, ExecutionResult>) -> Self {
        let total = results.len();
        let success = results.values().filter(|r| r.is_success()).count();
        let failed = total - success;

        let total_time: Duration = results.values().map(ExecutionResult::duration).sum();
        let average_duration = if total > 0 {
            total_time / total as u32
        } else {
            Duration::ZERO
        };

        let mut failures: Vec<(String, String)> = results
            .values()
            .filter(|r| !r.is_success())
            .map(|r| {
                (
                    r.ip.clone(),
                    r.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                )
            })
            .collect();
        failures.sort();

        Self {
            total,
            success,
            failed,
            average_duration,
            failures,
        }
    }

    /// Log the end-of-run summary. Always emitted, however the run ended.
    pub fn log(&self) {
        info!("batch summary: {} devices total", self.total);
        info!("  succeeded: {}", self.success);
        info!("  failed: {}", self.failed);
        info!(
            "  average duration: {:.2}s",
            self.average_duration.as_secs_f64()
        );
        for (ip, error) in &self.failures {
            info!("  failed device {ip}: {error}");
        }
    }
}
