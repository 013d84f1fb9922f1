//! The state machine driving every [`DeferredWorkflow`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DeferredOperation, DeferredWorkflow, OperationStatus, PollOutcome, PollPolicy};
use crate::error::{GatewayError, GatewayResult, Phase};
use crate::progress::{NoProgress, ProgressEvent, ProgressSink};

/// Smallest sleep between polls, so a zero interval cannot spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Drives submit → poll → fetch with cancellation and deadlines.
///
/// Timing: the first poll happens right after submission. After a poll that
/// is not ready, the engine sleeps `interval` and polls again only if
/// `elapsed + interval <= deadline`; otherwise the operation expires. With an
/// interval of 1s and a deadline of 3s that is four polls (t = 0, 1, 2, 3)
/// before `Timeout`.
#[derive(Clone)]
pub struct DeferredEngine {
    progress: Arc<dyn ProgressSink>,
}

impl Default for DeferredEngine {
    fn default() -> Self {
        Self::new(Arc::new(NoProgress))
    }
}

impl DeferredEngine {
    pub fn new(progress: Arc<dyn ProgressSink>) -> Self {
        Self { progress }
    }

    /// Runs a workflow to completion.
    ///
    /// # Errors
    ///
    /// - `Rejected` when the provider reports the job/order as failed
    /// - `Timeout` when the deadline elapses first
    /// - `NotAvailable` when waiting is disabled and the first poll is not ready
    /// - `Cancelled` when `cancel` fires (the remote cancel hook is invoked)
    /// - any non-transient error from submit, poll or fetch
    pub async fn run<W: DeferredWorkflow>(
        &self,
        workflow: &W,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> GatewayResult<W::Output> {
        let mut op = DeferredOperation::new(workflow.kind(), workflow.provider(), policy);
        let label = format!("{} for {}", op.kind, workflow.subject());
        let cancelled = || GatewayError::Cancelled {
            operation: label.clone(),
        };

        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            submitted = workflow.submit() => submitted?,
        };
        op.handle = Some(handle.to_string());
        debug!(provider = %op.provider, handle = %handle, "{} submitted", label);

        let started = Instant::now();
        let interval = policy.interval.max(MIN_POLL_INTERVAL);
        loop {
            op.attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.abort(workflow, &handle).await;
                    return Err(cancelled());
                }
                outcome = workflow.poll(&handle) => outcome,
            };

            match outcome {
                Ok(PollOutcome::Ready) => {
                    op.status = OperationStatus::Ready;
                    break;
                }
                Ok(PollOutcome::Failed(reason)) => {
                    op.status = OperationStatus::Failed;
                    warn!(provider = %op.provider, handle = %handle, "{} failed: {}", label, reason);
                    return Err(GatewayError::Rejected {
                        provider: op.provider,
                        phase: Phase::Poll,
                        reason,
                    });
                }
                Ok(PollOutcome::Pending { progress, message }) => {
                    op.status = OperationStatus::Pending;
                    op.last_message = match (progress, message) {
                        (Some(pct), Some(msg)) => Some(format!("{} ({}%)", msg, pct)),
                        (Some(pct), None) => Some(format!("{}%", pct)),
                        (None, msg) => msg,
                    };
                }
                Err(e) if e.is_transient() => {
                    warn!(provider = %op.provider, handle = %handle, error = %e, "transient error while polling {}", label);
                    op.last_message = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }

            let elapsed = started.elapsed();
            let Some(deadline) = policy.deadline else {
                self.abort(workflow, &handle).await;
                return Err(GatewayError::NotAvailable(format!(
                    "{} on {} is not ready ({})",
                    label,
                    op.provider,
                    op.describe()
                )));
            };
            if elapsed + interval > deadline {
                op.status = OperationStatus::Expired;
                self.abort(workflow, &handle).await;
                return Err(GatewayError::Timeout {
                    provider: op.provider.clone(),
                    operation: label.clone(),
                    elapsed_secs: elapsed.as_secs(),
                    last_status: op.describe(),
                });
            }

            let status = op
                .last_message
                .clone()
                .unwrap_or_else(|| "pending".to_string());
            info!(
                provider = %op.provider,
                attempt = op.attempts,
                "{} not ready ({}): waiting {}s until next retry",
                label,
                status,
                interval.as_secs()
            );
            self.progress.on_event(&ProgressEvent::Waiting {
                kind: op.kind,
                provider: op.provider.clone(),
                subject: workflow.subject().to_string(),
                attempt: op.attempts,
                elapsed,
                retry_in: interval,
                status,
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.abort(workflow, &handle).await;
                    return Err(cancelled());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        debug!(provider = %op.provider, attempts = op.attempts, "{} ready", label);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            output = workflow.fetch(&handle) => output,
        }
    }

    async fn abort<W: DeferredWorkflow>(&self, workflow: &W, handle: &W::Handle) {
        if let Err(e) = workflow.cancel(handle).await {
            debug!(provider = %workflow.provider(), handle = %handle, error = %e, "remote cancel failed");
        }
    }
}
