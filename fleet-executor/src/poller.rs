//! Polls asynchronous hypervisor tasks to completion.

use std::time::Duration;

use fleet_core::{AuthSession, TaskHandle, TaskOutcome};
use tokio::time::Instant;

use crate::api::HypervisorApi;
use crate::discovery::window_closes_before_next_poll;
use crate::ExecutorError;

/// Polls one task's status at a fixed interval until it stops.
///
/// Query errors (non-2xx, transport) are fatal; nothing is retried.
#[derive(Debug, Clone, Copy)]
pub struct TaskPoller {
    interval: Duration,
    timeout: Option<Duration>,
}

impl TaskPoller {
    /// Poll every `interval`, giving up after `timeout` if one is set.
    ///
    /// A `timeout` too large to represent as a deadline means no deadline.
    #[must_use]
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self { interval, timeout }
    }

    /// Wait until `task` reaches its terminal phase.
    ///
    /// The first status query is issued immediately. The returned outcome
    /// may be unsuccessful; see [`TaskPoller::wait_ok`].
    ///
    /// # Errors
    /// Returns [`ExecutorError::TaskTimedOut`] if the deadline passes first,
    /// or any error from the status query.
    pub async fn wait(
        &self,
        api: &HypervisorApi,
        session: &AuthSession,
        task: &TaskHandle,
    ) -> Result<TaskOutcome, ExecutorError> {
        let started = Instant::now();
        let deadline = self.timeout.and_then(|t| started.checked_add(t));
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            let status = api.task_status(session, task).await?;
            if status.is_terminal() {
                let exit_status = status.exitstatus.unwrap_or_default();
                tracing::debug!(upid = %task, %exit_status, polls, "task finished");
                return Ok(TaskOutcome::from_exit_status(exit_status, polls));
            }

            if let Some(deadline) = deadline {
                if window_closes_before_next_poll(deadline, self.interval) {
                    tracing::warn!(upid = %task, polls, "task deadline reached");
                    return Err(ExecutorError::TaskTimedOut {
                        upid: task.upid.clone(),
                        waited_secs: started.elapsed().as_secs(),
                        polls,
                    });
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Like [`TaskPoller::wait`], but a non-`OK` exit status is an error.
    ///
    /// # Errors
    /// Returns [`ExecutorError::TaskFailed`] carrying the raw exit status, plus
    /// every error of [`TaskPoller::wait`].
    pub async fn wait_ok(
        &self,
        api: &HypervisorApi,
        session: &AuthSession,
        task: &TaskHandle,
    ) -> Result<TaskOutcome, ExecutorError> {
        let outcome = self.wait(api, session, task).await?;
        if outcome.success {
            Ok(outcome)
        } else {
            Err(ExecutorError::TaskFailed {
                upid: task.upid.clone(),
                exit_status: outcome.exit_status,
            })
        }
    }
}
