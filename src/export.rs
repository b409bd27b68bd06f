//! Export sub-job orchestration
//!
//! Each exportable representation of a completed generation is itself an
//! independently tracked remote job: submit, wait for terminal status, then
//! materialize the artifact through the cache. The state machine mirrors
//! the generation orchestrator minus the exporting phase:
//! `Submit → Tracking → {Materialize → Done} | Aborted | Failed`.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::ArtifactCache;
use crate::cancel::CancellationCoordinator;
use crate::config::RetryConfig;
use crate::error::{Error, ExportError, Result};
use crate::retry::with_retry;
use crate::tracker::{JobScope, StatusTracker, WaitOutcome};
use crate::transport::Transport;
use crate::types::{
    ArtifactKind, ArtifactPayload, CancelResponse, CubeFace, Cubemap, Event, Job, JobId,
    Materialization, Status,
};

/// Drives one export job from submission to a materialized artifact
pub(crate) struct ExportOrchestrator {
    pub(crate) transport: Arc<Transport>,
    pub(crate) cache: Arc<ArtifactCache>,
    pub(crate) tracker: Arc<dyn StatusTracker>,
    pub(crate) retry: RetryConfig,
    pub(crate) events: broadcast::Sender<Event>,
}

impl ExportOrchestrator {
    /// Run one export to completion
    ///
    /// Returns `Ok(Some(payload))` on success, `Ok(None)` when the service
    /// reported an artifact kind this client does not recognize (logged and
    /// skipped per the forward-compatibility policy), and `Err` on failure
    /// or cancellation. A failure here is isolated to this export; siblings
    /// are unaffected.
    pub(crate) async fn run(
        &self,
        primary_id: JobId,
        kind: ArtifactKind,
        cancel: &CancellationCoordinator,
    ) -> Result<Option<ArtifactPayload>> {
        let job = self.submit(primary_id, kind, cancel).await?;
        let _ = self.events.send(Event::ExportStarted {
            id: primary_id,
            kind,
        });

        let mut on_progress = |j: &Job| {
            let _ = self.events.send(Event::StatusChanged {
                id: j.id,
                status: j.status,
                queue_position: j.queue_position,
            });
        };

        let outcome = self
            .tracker
            .wait_for_terminal(job, JobScope::Export, &mut on_progress, cancel.token())
            .await?;

        let job = match outcome {
            WaitOutcome::Cancelled(last) => {
                self.remote_cancel(last.id).await;
                return Err(Error::Cancelled);
            }
            WaitOutcome::Terminal(job) => job,
        };

        match job.status {
            Status::Complete => self.materialize(&job, kind, cancel).await,
            Status::Abort => Err(Error::Cancelled),
            Status::Error => Err(Error::JobFailed {
                id: job.id,
                message: job.error_message_or_default(),
            }),
            status => Err(Error::Other(format!(
                "tracker resolved export {} with non-terminal status {}",
                job.id, status
            ))),
        }
    }

    async fn submit(
        &self,
        primary_id: JobId,
        kind: ArtifactKind,
        cancel: &CancellationCoordinator,
    ) -> Result<Job> {
        let body = serde_json::json!({
            "job_id": primary_id,
            "kind": kind.slug(),
        });
        let response = with_retry(&self.retry, cancel.token(), || async {
            self.transport
                .post_json::<_, Job>("export", &body, cancel.token())
                .await
        })
        .await?;
        debug!(primary = %primary_id, %kind, export = %response.data.id, "export job submitted");
        Ok(response.data)
    }

    /// Best-effort remote cancel; failures are logged, never propagated
    pub(crate) async fn remote_cancel(&self, id: JobId) {
        let detached = CancellationCoordinator::detached_token();
        match self
            .transport
            .delete_json::<CancelResponse>(&JobScope::Export.cancel_path(id), &detached)
            .await
        {
            Ok(response) if response.data.success => {
                info!(export = %id, "remote export cancel acknowledged");
            }
            Ok(response) => {
                warn!(
                    export = %id,
                    error = response.data.error.as_deref().unwrap_or("unspecified"),
                    "remote export cancel rejected"
                );
            }
            Err(e) => warn!(export = %id, error = %e, "remote export cancel failed"),
        }
    }

    /// Turn a completed export job into a caller-visible payload
    async fn materialize(
        &self,
        job: &Job,
        requested: ArtifactKind,
        cancel: &CancellationCoordinator,
    ) -> Result<Option<ArtifactPayload>> {
        // Trust the service's reported kind when present; an unknown slug is
        // skipped rather than failed so newer service versions degrade softly.
        let kind = match job.kind.as_deref() {
            Some(slug) => match ArtifactKind::parse(slug) {
                Some(kind) => kind,
                None => {
                    warn!(export = %job.id, %slug, "unrecognized artifact kind, skipping");
                    return Ok(None);
                }
            },
            None => requested,
        };

        let url = job
            .file_url
            .as_deref()
            .ok_or(ExportError::MissingFileUrl { id: job.id })?;

        match kind.materialization() {
            Materialization::SingleFile | Materialization::OpaqueBlob => {
                let path = self.cache.fetch(&self.transport, url, cancel.token()).await?;
                debug!(export = %job.id, %kind, ?path, "artifact cached");
                Ok(Some(ArtifactPayload::File(path)))
            }
            Materialization::CubeFaceArchive => {
                let archive = self.cache.fetch(&self.transport, url, cancel.token()).await?;
                debug!(export = %job.id, %kind, ?archive, "assembling cubemap from archive");
                // Unpacking and face decodes are blocking work; keep them
                // off the async runtime.
                let cubemap = tokio::task::spawn_blocking(move || assemble_cubemap(&archive))
                    .await
                    .map_err(|e| Error::Other(format!("cubemap assembly task failed: {}", e)))??;
                Ok(Some(ArtifactPayload::Cubemap(cubemap)))
            }
        }
    }
}

/// Unpack a cached cube-face archive and assemble the faces into a cubemap
///
/// Face entries are matched to slots by filename stem (see
/// [`CubeFace::from_stem`]); entries that match no slot are skipped. A face
/// that fails to decode, or a missing face, fails this export only.
pub(crate) fn assemble_cubemap(archive_path: &Path) -> Result<Cubemap> {
    let file = std::fs::File::open(archive_path).map_err(|e| ExportError::ArchiveUnpack {
        archive: archive_path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| ExportError::ArchiveUnpack {
        archive: archive_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut faces: [Option<image::DynamicImage>; 6] = Default::default();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| ExportError::ArchiveUnpack {
            archive: archive_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let Some(stem) = Path::new(&name).file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(face) = CubeFace::from_stem(stem) else {
            debug!(entry = %name, "archive entry matches no cube face, skipping");
            continue;
        };

        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| ExportError::FaceDecode {
                face: name.clone(),
                reason: e.to_string(),
            })?;
        let decoded = image::load_from_memory(&bytes).map_err(|e| ExportError::FaceDecode {
            face: name.clone(),
            reason: e.to_string(),
        })?;

        if faces[face.index()].is_some() {
            warn!(entry = %name, slot = face.name(), "duplicate cube face, keeping first");
        } else {
            faces[face.index()] = Some(decoded);
        }
    }

    let mut take = |face: CubeFace| {
        faces[face.index()].take().ok_or(ExportError::MissingFace {
            archive: archive_path.to_path_buf(),
            face: face.name(),
        })
    };
    let cubemap = Cubemap::new([
        take(CubeFace::Front)?,
        take(CubeFace::Back)?,
        take(CubeFace::Left)?,
        take(CubeFace::Right)?,
        take(CubeFace::Top)?,
        take(CubeFace::Bottom)?,
    ]);
    Ok(cubemap)
}
