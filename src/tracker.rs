//! Job status tracking strategies
//!
//! Two interchangeable strategies behind one interface: a polling loop
//! (always available, the default) and a push-channel subscription paired
//! with a slow safety-net poll. Both normalize into the same status enum
//! and the same progress-callback shape.
//!
//! Cancellation contract: when the token triggers mid-wait, the tracker
//! returns within one tick with the last observed job and never issues the
//! remote cancel itself — that follow-up belongs to the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::push::PushChannel;
use crate::transport::Transport;
use crate::types::{Job, JobId};

/// Progress callback invoked for each observed (possibly unchanged) status
pub type ProgressFn<'a> = &'a mut (dyn FnMut(&Job) + Send);

/// Which endpoint family a job belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobScope {
    /// Primary generation jobs (`generation/{id}`)
    Generation,
    /// Export sub-jobs (`export/{id}`)
    Export,
}

impl JobScope {
    /// Status endpoint path for a job
    pub fn status_path(&self, id: JobId) -> String {
        match self {
            JobScope::Generation => format!("generation/{}", id),
            JobScope::Export => format!("export/{}", id),
        }
    }

    /// Cancel endpoint path for a job
    pub fn cancel_path(&self, id: JobId) -> String {
        // Cancel mirrors status on both endpoint families.
        self.status_path(id)
    }
}

/// How a wait resolved
#[derive(Clone, Debug)]
pub enum WaitOutcome {
    /// The job reached a terminal status
    Terminal(Job),
    /// Cancellation was requested; carries the last observed job state
    Cancelled(Job),
}

/// A strategy for waiting until a job reaches a terminal status
#[async_trait]
pub trait StatusTracker: Send + Sync {
    /// Wait until `job` reaches a terminal status or `cancel` triggers
    ///
    /// `on_progress` fires zero or more times before the wait resolves.
    /// Statuses observed through one wait are monotonic with respect to the
    /// terminal/non-terminal partition; intermediate non-terminal statuses
    /// may be skipped entirely.
    async fn wait_for_terminal(
        &self,
        job: Job,
        scope: JobScope,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome>;
}

/// Polling strategy: sleep, fetch, repeat until terminal
pub struct PollingTracker {
    transport: Arc<Transport>,
    interval: Duration,
}

impl PollingTracker {
    /// Create a polling tracker with the given poll interval
    pub fn new(transport: Arc<Transport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
        }
    }

    async fn poll_loop(
        &self,
        mut last: Job,
        scope: JobScope,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
        interval: Duration,
    ) -> Result<WaitOutcome> {
        if last.status.is_terminal() {
            return Ok(WaitOutcome::Terminal(last));
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(WaitOutcome::Cancelled(last)),
                _ = tokio::time::sleep(interval) => {}
            }

            let path = scope.status_path(last.id);
            match self.transport.get_json::<Job>(&path, cancel).await {
                Ok(response) => {
                    let fetched = response.data;
                    on_progress(&fetched);
                    if fetched.status.is_terminal() {
                        debug!(id = %fetched.id, status = %fetched.status, "job reached terminal status");
                        return Ok(WaitOutcome::Terminal(fetched));
                    }
                    last = fetched;
                }
                Err(Error::Cancelled) => return Ok(WaitOutcome::Cancelled(last)),
                // Transport failure is fatal for this wait; the orchestrator
                // decides what it means for the job.
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl StatusTracker for PollingTracker {
    async fn wait_for_terminal(
        &self,
        job: Job,
        scope: JobScope,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome> {
        self.poll_loop(job, scope, on_progress, cancel, self.interval)
            .await
    }
}

/// Push strategy: channel subscription plus a slow safety-net poll
///
/// Because push delivery is not guaranteed exactly-once or timely, a
/// background poll at `safety_interval` runs alongside the subscription and
/// the wait resolves from whichever source reports a terminal status first.
/// The subscription is released when the wait resolves, regardless of which
/// source won. Jobs without channel information, and subscription failures,
/// fall back to plain polling at the normal interval.
pub struct PushTracker {
    transport: Arc<Transport>,
    push: Arc<dyn PushChannel>,
    poll_interval: Duration,
    safety_interval: Duration,
}

impl PushTracker {
    /// Create a push tracker
    pub fn new(
        transport: Arc<Transport>,
        push: Arc<dyn PushChannel>,
        poll_interval: Duration,
        safety_interval: Duration,
    ) -> Self {
        Self {
            transport,
            push,
            poll_interval,
            safety_interval,
        }
    }

    fn fallback(&self) -> PollingTracker {
        PollingTracker::new(self.transport.clone(), self.poll_interval)
    }
}

#[async_trait]
impl StatusTracker for PushTracker {
    async fn wait_for_terminal(
        &self,
        job: Job,
        scope: JobScope,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome> {
        if job.status.is_terminal() {
            return Ok(WaitOutcome::Terminal(job));
        }

        let (Some(channel), Some(event)) = (job.push_channel.clone(), job.push_event.clone())
        else {
            debug!(id = %job.id, "job has no push channel, falling back to polling");
            return self
                .fallback()
                .wait_for_terminal(job, scope, on_progress, cancel)
                .await;
        };

        let mut subscription = match self.push.subscribe(&channel, &event).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(id = %job.id, error = %e, "push subscribe failed, falling back to polling");
                return self
                    .fallback()
                    .wait_for_terminal(job, scope, on_progress, cancel)
                    .await;
            }
        };

        let mut safety = tokio::time::interval(self.safety_interval);
        safety.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately; consume it
        // so the safety net waits a full period before its first poll.
        safety.tick().await;

        let mut last = job;
        let mut push_open = true;

        let result: Result<WaitOutcome> = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(WaitOutcome::Cancelled(last)),
                payload = subscription.next(), if push_open => {
                    match payload {
                        Some(value) => match serde_json::from_value::<Job>(value) {
                            Ok(pushed) => {
                                on_progress(&pushed);
                                if pushed.status.is_terminal() {
                                    debug!(id = %pushed.id, status = %pushed.status, "terminal status via push");
                                    break Ok(WaitOutcome::Terminal(pushed));
                                }
                                last = pushed;
                            }
                            Err(e) => warn!(error = %e, "undecodable push payload ignored"),
                        },
                        None => {
                            // Channel went away; the safety net carries the wait.
                            warn!(id = %last.id, "push channel ended, relying on safety-net poll");
                            push_open = false;
                        }
                    }
                }
                _ = safety.tick() => {
                    let path = scope.status_path(last.id);
                    match self.transport.get_json::<Job>(&path, cancel).await {
                        Ok(response) => {
                            let fetched = response.data;
                            on_progress(&fetched);
                            if fetched.status.is_terminal() {
                                debug!(id = %fetched.id, status = %fetched.status, "terminal status via safety-net poll");
                                break Ok(WaitOutcome::Terminal(fetched));
                            }
                            last = fetched;
                        }
                        Err(Error::Cancelled) => break Ok(WaitOutcome::Cancelled(last)),
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        subscription.unsubscribe().await;
        result
    }
}
