use std::sync::Arc;
use std::time::Duration;

use manager_sdk::{ClientError, Execution, ExecutionStatus, ManagerApi};
use thiserror::Error;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(3600);

/// Stand-in for "never" when a deadline does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Ask the manager to cancel the execution when the wait times out.
    pub cancel_on_timeout: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_EXECUTION_TIMEOUT,
            cancel_on_timeout: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("execution {execution_id} {status}: {message}")]
    Terminal {
        execution_id: String,
        status: ExecutionStatus,
        message: String,
    },
    #[error("execution {execution_id} still {} after {waited:?}", last_status_label(.last_status))]
    Timeout {
        execution_id: String,
        last_status: Option<ExecutionStatus>,
        waited: Duration,
    },
    #[error("wait for execution {execution_id} cancelled")]
    Cancelled { execution_id: String },
    #[error("polling execution {execution_id} failed: {source}")]
    Client {
        execution_id: String,
        #[source]
        source: ClientError,
    },
}

impl WatchError {
    pub fn execution_id(&self) -> &str {
        match self {
            WatchError::Terminal { execution_id, .. }
            | WatchError::Timeout { execution_id, .. }
            | WatchError::Cancelled { execution_id }
            | WatchError::Client { execution_id, .. } => execution_id,
        }
    }
}

fn instant_after(from: Instant, after: Duration) -> Instant {
    from.checked_add(after)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

fn last_status_label(status: &Option<ExecutionStatus>) -> &'static str {
    status.map_or("unobserved", |s| s.as_str())
}

/// Polls an execution until it reaches a terminal status, the timeout
/// elapses, or the caller cancels.
pub struct ExecutionWatcher {
    manager: Arc<dyn ManagerApi>,
    options: WatchOptions,
}

impl ExecutionWatcher {
    pub fn new(manager: Arc<dyn ManagerApi>, options: WatchOptions) -> Self {
        Self { manager, options }
    }

    pub fn options(&self) -> &WatchOptions {
        &self.options
    }

    pub async fn wait_for(
        &self,
        execution_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Execution, WatchError> {
        let started = Instant::now();
        let deadline = instant_after(started, self.options.timeout);
        let mut last_status: Option<ExecutionStatus> = None;
        let mut polls = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(execution_id));
            }

            // A poll may overrun the deadline by at most one interval.
            let poll_deadline =
                deadline.max(instant_after(Instant::now(), self.options.poll_interval));
            polls += 1;
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(execution_id)),
                polled = timeout_at(poll_deadline, self.manager.get_execution(execution_id)) => polled,
            };

            match polled {
                Err(_) => {
                    warn!(execution_id, polls, "execution poll did not return in time");
                    return Err(self.timed_out(execution_id, last_status, started).await);
                }
                Ok(Err(err)) if err.is_transient() => {
                    warn!(
                        execution_id,
                        polls,
                        error = %err,
                        "execution poll failed, will poll again"
                    );
                }
                Ok(Err(source)) => {
                    return Err(WatchError::Client {
                        execution_id: execution_id.to_string(),
                        source,
                    })
                }
                Ok(Ok(execution)) => {
                    if last_status != Some(execution.status) {
                        info!(execution_id, status = %execution.status, "execution status");
                    } else {
                        debug!(execution_id, status = %execution.status, polls, "execution status unchanged");
                    }
                    last_status = Some(execution.status);
                    match execution.status {
                        ExecutionStatus::Succeeded => return Ok(execution),
                        ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                            return Err(WatchError::Terminal {
                                execution_id: execution_id.to_string(),
                                status: execution.status,
                                message: execution.error.unwrap_or_default(),
                            })
                        }
                        _ => {}
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(execution_id, last_status, started).await);
            }
            let wake = instant_after(now, self.options.poll_interval).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(execution_id)),
                _ = sleep_until(wake) => {}
            }
        }
    }

    fn cancelled(&self, execution_id: &str) -> WatchError {
        info!(execution_id, "wait cancelled, execution left running");
        WatchError::Cancelled {
            execution_id: execution_id.to_string(),
        }
    }

    async fn timed_out(
        &self,
        execution_id: &str,
        last_status: Option<ExecutionStatus>,
        started: Instant,
    ) -> WatchError {
        let waited = started.elapsed();
        if self.options.cancel_on_timeout {
            info!(execution_id, "wait timed out, requesting cancellation");
            if let Err(err) = self.manager.cancel_execution(execution_id).await {
                warn!(execution_id, error = %err, "cancel after timeout failed");
            }
        } else {
            info!(execution_id, "wait timed out, execution left running");
        }
        WatchError::Timeout {
            execution_id: execution_id.to_string(),
            last_status,
            waited,
        }
    }
}
