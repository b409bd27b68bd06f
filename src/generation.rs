//! Primary generation job orchestration
//!
//! Owns the lifecycle of one generation request:
//! `Idle → Submitting → Tracking → {Exporting → Done} | Aborted | Failed`.
//! On `Complete` the orchestrator fans out one [`ExportOrchestrator`] per
//! requested artifact kind, joins on all of them (wait-all, not wait-any),
//! and folds the outcomes into a single [`GenerationResult`]. A failed
//! export never fails a completed generation — it is recorded against its
//! kind as a partial-failure diagnostic.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::ArtifactCache;
use crate::cancel::CancellationCoordinator;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::export::ExportOrchestrator;
use crate::retry::with_retry;
use crate::tracker::{JobScope, StatusTracker, WaitOutcome};
use crate::transport::{MultipartFile, Transport};
use crate::types::{
    ArtifactKind, CancelResponse, Event, GenerationRequest, GenerationResult, Job, JobId,
    RemixSource, Status,
};

/// JSON body for a non-multipart generation submission
#[derive(Serialize)]
struct GenerationSubmission<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remix_id: Option<JobId>,
}

/// Drives one generation request from submission to a hydrated result
pub(crate) struct GenerationOrchestrator {
    pub(crate) transport: Arc<Transport>,
    pub(crate) cache: Arc<ArtifactCache>,
    pub(crate) tracker: Arc<dyn StatusTracker>,
    pub(crate) retry: RetryConfig,
    pub(crate) events: broadcast::Sender<Event>,
}

impl GenerationOrchestrator {
    /// Run the full generation lifecycle
    ///
    /// Resolves `Ok` with a result whose status is `Complete` (possibly with
    /// per-kind export failures) or `Abort` (remote abort or caller
    /// cancellation). Remote `Error` and submission failures resolve `Err`.
    pub(crate) async fn run(
        self: Arc<Self>,
        request: GenerationRequest,
        cancel: CancellationCoordinator,
    ) -> Result<GenerationResult> {
        let job = match self.submit(&request, &cancel).await {
            Ok(job) => job,
            Err(Error::Cancelled) => {
                let _ = self.events.send(Event::Cancelled { id: None });
                return Err(Error::Cancelled);
            }
            Err(e) => {
                let _ = self.events.send(Event::Failed {
                    id: None,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        info!(id = %job.id, "generation job submitted");
        let _ = self.events.send(Event::Submitted { id: job.id });

        let events = self.events.clone();
        let mut on_progress = move |j: &Job| {
            let _ = events.send(Event::StatusChanged {
                id: j.id,
                status: j.status,
                queue_position: j.queue_position,
            });
        };

        let outcome = match self
            .tracker
            .wait_for_terminal(
                job.clone(),
                JobScope::Generation,
                &mut on_progress,
                cancel.token(),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = self.events.send(Event::Failed {
                    id: Some(job.id),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let job = match outcome {
            WaitOutcome::Cancelled(mut last) => {
                // The tracker returned promptly; the remote cancel is ours.
                self.remote_cancel(last.id).await;
                last.status = Status::Abort;
                let _ = self.events.send(Event::Cancelled { id: Some(last.id) });
                return Ok(GenerationResult {
                    job: last,
                    artifacts: HashMap::new(),
                    failures: HashMap::new(),
                });
            }
            WaitOutcome::Terminal(job) => job,
        };

        match job.status {
            Status::Complete => {}
            Status::Abort => {
                let _ = self.events.send(Event::Cancelled { id: Some(job.id) });
                return Ok(GenerationResult {
                    job,
                    artifacts: HashMap::new(),
                    failures: HashMap::new(),
                });
            }
            Status::Error => {
                let message = job.error_message_or_default();
                let _ = self.events.send(Event::Failed {
                    id: Some(job.id),
                    reason: message.clone(),
                });
                return Err(Error::JobFailed {
                    id: job.id,
                    message,
                });
            }
            status => {
                return Err(Error::Other(format!(
                    "tracker resolved generation {} with non-terminal status {}",
                    job.id, status
                )));
            }
        }

        let (artifacts, failures) = self.run_exports(&job, &request.exports, &cancel).await;

        // Cancellation during the exporting phase still resolves as Abort;
        // artifacts that finished before the trigger are kept.
        if cancel.is_cancelled() {
            let mut job = job;
            job.status = Status::Abort;
            let _ = self.events.send(Event::Cancelled { id: Some(job.id) });
            return Ok(GenerationResult {
                job,
                artifacts,
                failures,
            });
        }

        let _ = self.events.send(Event::Completed { id: job.id });
        Ok(GenerationResult {
            job,
            artifacts,
            failures,
        })
    }

    /// Fan out one export per requested kind and join on all of them
    async fn run_exports(
        &self,
        job: &Job,
        kinds: &[ArtifactKind],
        cancel: &CancellationCoordinator,
    ) -> (
        HashMap<ArtifactKind, crate::types::ArtifactPayload>,
        HashMap<ArtifactKind, String>,
    ) {
        let mut requested = Vec::new();
        for kind in kinds.iter().copied() {
            if !requested.contains(&kind) {
                requested.push(kind);
            }
        }

        let mut handles = Vec::new();
        for kind in requested {
            let exporter = ExportOrchestrator {
                transport: self.transport.clone(),
                cache: self.cache.clone(),
                tracker: self.tracker.clone(),
                retry: self.retry.clone(),
                events: self.events.clone(),
            };
            let cancel = cancel.clone();
            let primary = job.id;
            handles.push((
                kind,
                tokio::spawn(async move { exporter.run(primary, kind, &cancel).await }),
            ));
        }

        let mut artifacts = HashMap::new();
        let mut failures = HashMap::new();
        for (kind, handle) in handles {
            match handle.await {
                Ok(Ok(Some(payload))) => {
                    debug!(id = %job.id, %kind, "export materialized");
                    let _ = self.events.send(Event::ExportFinished { id: job.id, kind });
                    artifacts.insert(kind, payload);
                }
                Ok(Ok(None)) => {
                    // Unrecognized kind, already logged by the export.
                }
                Ok(Err(Error::Cancelled)) => {
                    // Not an export failure; the caller sees the cancelled
                    // outcome on the generation itself.
                    debug!(id = %job.id, %kind, "export cancelled");
                }
                Ok(Err(e)) => {
                    let reason = e.to_string();
                    warn!(id = %job.id, %kind, %reason, "export failed");
                    let _ = self.events.send(Event::ExportFailed {
                        id: job.id,
                        kind,
                        reason: reason.clone(),
                    });
                    failures.insert(kind, reason);
                }
                Err(join_error) => {
                    let reason = format!("export task failed: {}", join_error);
                    warn!(id = %job.id, %kind, %reason, "export task join failed");
                    let _ = self.events.send(Event::ExportFailed {
                        id: job.id,
                        kind,
                        reason: reason.clone(),
                    });
                    failures.insert(kind, reason);
                }
            }
        }
        (artifacts, failures)
    }

    async fn submit(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationCoordinator,
    ) -> Result<Job> {
        match &request.remix {
            Some(RemixSource::ControlImage { bytes, filename }) => {
                let response = with_retry(&self.retry, cancel.token(), || async {
                    let mut fields = vec![("prompt".to_string(), request.prompt.clone())];
                    if let Some(negative) = &request.negative_prompt {
                        fields.push(("negative_prompt".to_string(), negative.clone()));
                    }
                    if let Some(style_id) = request.style_id {
                        fields.push(("style_id".to_string(), style_id.to_string()));
                    }
                    let file = MultipartFile {
                        field: "control_image".to_string(),
                        filename: filename.clone(),
                        bytes: bytes.clone(),
                    };
                    self.transport
                        .post_multipart::<Job>("generation", fields, Some(file), cancel.token())
                        .await
                })
                .await?;
                Ok(response.data)
            }
            remix => {
                let remix_id = match remix {
                    Some(RemixSource::Job(id)) => Some(*id),
                    _ => None,
                };
                let body = GenerationSubmission {
                    prompt: &request.prompt,
                    negative_prompt: request.negative_prompt.as_deref(),
                    style_id: request.style_id,
                    remix_id,
                };
                let response = with_retry(&self.retry, cancel.token(), || async {
                    self.transport
                        .post_json::<_, Job>("generation", &body, cancel.token())
                        .await
                })
                .await?;
                Ok(response.data)
            }
        }
    }

    /// Best-effort remote cancel; failures are logged, never propagated
    pub(crate) async fn remote_cancel(&self, id: JobId) {
        let detached = CancellationCoordinator::detached_token();
        match self
            .transport
            .delete_json::<CancelResponse>(&JobScope::Generation.cancel_path(id), &detached)
            .await
        {
            Ok(response) if response.data.success => {
                info!(id = %id, "remote generation cancel acknowledged");
            }
            Ok(response) => {
                warn!(
                    id = %id,
                    error = response.data.error.as_deref().unwrap_or("unspecified"),
                    "remote generation cancel rejected"
                );
            }
            Err(e) => warn!(id = %id, error = %e, "remote generation cancel failed"),
        }
    }
}
