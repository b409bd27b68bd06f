//! Public client surface
//!
//! [`SkygenClient`] owns the transport, the artifact cache, the tracking
//! strategy and every spawned generation task. Generations run as background
//! tasks identified by an opaque [`GenerationHandle`]; the caller awaits,
//! cancels or abandons them through the client, and observes progress either
//! through the broadcast [`Event`] stream or by awaiting the final
//! [`GenerationResult`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::ArtifactCache;
use crate::cancel::CancellationCoordinator;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::generation::GenerationOrchestrator;
use crate::push::{PushChannel, WebSocketPushChannel};
use crate::tracker::{JobScope, PollingTracker, PushTracker, StatusTracker};
use crate::transport::Transport;
use crate::types::{
    ArtifactKind, ArtifactPayload, Event, GenerationRequest, GenerationResult, Job, JobId,
    RateLimitInfo,
};

/// Buffer size of the broadcast event channel; slow subscribers skip
/// (lag) rather than block the orchestrators.
const EVENT_BUFFER: usize = 128;

/// Opaque handle to a submitted generation
///
/// Valid until the generation is awaited through
/// [`SkygenClient::await_result`] or the client shuts down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GenerationHandle(u64);

/// A generation task owned by the client
struct ActiveGeneration {
    task: JoinHandle<Result<GenerationResult>>,
    cancel: CancellationCoordinator,
}

/// Client for a remote skybox generation service
///
/// Construct with [`new`](Self::new) (tracking strategy chosen from the
/// configuration) or [`with_push_channel`](Self::with_push_channel) to
/// inject a custom push transport. All methods take `&self`; the client is
/// usually wrapped in an `Arc` and shared.
pub struct SkygenClient {
    transport: Arc<Transport>,
    cache: Arc<ArtifactCache>,
    tracker: Arc<dyn StatusTracker>,
    config: Config,
    events: broadcast::Sender<Event>,
    active: Mutex<HashMap<u64, ActiveGeneration>>,
    next_handle: AtomicU64,
}

impl SkygenClient {
    /// Create a client from a validated configuration
    ///
    /// When `api.push_url` is set, job tracking uses the WebSocket push
    /// channel with a safety-net poll; otherwise plain polling at
    /// `tracking.poll_interval`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(Transport::new(&config.api)?);
        let tracker: Arc<dyn StatusTracker> = match &config.api.push_url {
            Some(push_url) => {
                info!(%push_url, "tracking via push channel with safety-net poll");
                Arc::new(PushTracker::new(
                    transport.clone(),
                    Arc::new(WebSocketPushChannel::new(push_url.clone())),
                    config.tracking.poll_interval,
                    config.tracking.safety_poll_interval(),
                ))
            }
            None => {
                debug!(interval = ?config.tracking.poll_interval, "tracking via polling");
                Arc::new(PollingTracker::new(
                    transport.clone(),
                    config.tracking.poll_interval,
                ))
            }
        };
        Self::assemble(config, transport, tracker)
    }

    /// Create a client with a caller-supplied push transport
    ///
    /// Always tracks via push with the safety-net poll, regardless of
    /// `api.push_url`. Intended for embedding alternative notification
    /// transports (or in-memory channels in tests).
    pub fn with_push_channel(config: Config, push: Arc<dyn PushChannel>) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(Transport::new(&config.api)?);
        let tracker = Arc::new(PushTracker::new(
            transport.clone(),
            push,
            config.tracking.poll_interval,
            config.tracking.safety_poll_interval(),
        ));
        Self::assemble(config, transport, tracker)
    }

    fn assemble(
        config: Config,
        transport: Arc<Transport>,
        tracker: Arc<dyn StatusTracker>,
    ) -> Result<Self> {
        let cache = Arc::new(ArtifactCache::new(&config.cache.cache_dir)?);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            transport,
            cache,
            tracker,
            config,
            events,
            active: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    /// Subscribe to the client-wide event stream
    ///
    /// Carries lifecycle events for every generation and export driven by
    /// this client. Receivers that fall behind observe a lag error and then
    /// resume with current events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Submit a generation and drive it in the background
    ///
    /// Returns immediately with a handle; the job runs to its terminal
    /// state (including export fan-out) whether or not the handle is ever
    /// awaited.
    pub async fn submit(&self, request: GenerationRequest) -> GenerationHandle {
        let cancel = CancellationCoordinator::new();
        let orchestrator = Arc::new(GenerationOrchestrator {
            transport: self.transport.clone(),
            cache: self.cache.clone(),
            tracker: self.tracker.clone(),
            retry: self.config.retry.clone(),
            events: self.events.clone(),
        });
        let task = tokio::spawn(orchestrator.run(request, cancel.clone()));

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.active
            .lock()
            .await
            .insert(id, ActiveGeneration { task, cancel });
        GenerationHandle(id)
    }

    /// Await a submitted generation's terminal result
    ///
    /// Consumes the handle: a second await of the same handle fails with
    /// [`Error::UnknownHandle`].
    pub async fn await_result(&self, handle: GenerationHandle) -> Result<GenerationResult> {
        let entry = self
            .active
            .lock()
            .await
            .remove(&handle.0)
            .ok_or(Error::UnknownHandle(handle.0))?;
        match entry.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Other(format!("generation task failed: {}", e))),
        }
    }

    /// Request cancellation of a running generation
    ///
    /// Triggers the generation's coordinator; the task resolves promptly
    /// with an `Abort` result (followed by a best-effort remote cancel) and
    /// remains awaitable through [`await_result`](Self::await_result).
    /// Idempotent while the handle is live.
    pub async fn cancel(&self, handle: GenerationHandle) -> Result<()> {
        let map = self.active.lock().await;
        let entry = map.get(&handle.0).ok_or(Error::UnknownHandle(handle.0))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Submit a generation and await its result in one call
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let handle = self.submit(request).await;
        self.await_result(handle).await
    }

    /// Fetch the current state of a generation job by id
    pub async fn fetch_job(&self, id: JobId) -> Result<Job> {
        let detached = CancellationCoordinator::detached_token();
        let response = self
            .transport
            .get_json::<Job>(&JobScope::Generation.status_path(id), &detached)
            .await?;
        Ok(response.data)
    }

    /// Look up a result's artifact on disk without touching the network
    ///
    /// Resolves to the cached file backing the artifact, a miss when the
    /// kind was not exported, failed, or its cache entry has since been
    /// removed. In-memory payloads (assembled cubemaps) have no backing
    /// file and resolve as a miss.
    pub fn try_get_cached_artifact(
        &self,
        result: &GenerationResult,
        kind: ArtifactKind,
    ) -> Option<PathBuf> {
        match result.artifact(kind)? {
            ArtifactPayload::File(path) if path.is_file() => Some(path.clone()),
            _ => None,
        }
    }

    /// Look up a cached artifact for a remote URL without touching the network
    pub fn try_resolve_cached(&self, url: &str) -> Option<PathBuf> {
        self.cache.try_resolve(url)
    }

    /// The most recent rate-limit counters observed on any response
    pub fn last_rate_limit(&self) -> Option<RateLimitInfo> {
        self.transport.last_rate_limit()
    }

    /// Cancel and await every in-flight generation
    ///
    /// After shutdown all outstanding handles are invalid. The client
    /// itself remains usable for new submissions.
    pub async fn shutdown(&self) {
        let drained: Vec<(u64, ActiveGeneration)> =
            self.active.lock().await.drain().collect();
        for (_, entry) in &drained {
            entry.cancel.cancel();
        }
        for (id, entry) in drained {
            if let Err(e) = entry.task.await {
                warn!(handle = id, error = %e, "generation task failed during shutdown");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, CacheConfig, TrackingConfig};
    use crate::types::Status;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer, cache_dir: &std::path::Path) -> Config {
        Config {
            api: ApiConfig {
                base_url: server.uri(),
                ..Default::default()
            },
            cache: CacheConfig {
                cache_dir: cache_dir.to_path_buf(),
            },
            tracking: TrackingConfig {
                poll_interval: Duration::from_millis(20),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn job_json(id: i64, status: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "obfuscated_id": format!("ob-{}", id),
            "status": status,
        })
    }

    #[tokio::test]
    async fn submit_and_await_resolves_a_complete_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_json(1, "complete")))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();
        let mut events = client.subscribe();

        let handle = client
            .submit(GenerationRequest {
                prompt: "forest".to_string(),
                ..Default::default()
            })
            .await;
        let result = client.await_result(handle).await.unwrap();

        assert_eq!(result.status(), Status::Complete);
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::Submitted { id } if id == JobId(1)
        ));
    }

    #[tokio::test]
    async fn a_handle_is_consumed_by_await() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_json(2, "complete")))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();

        let handle = client
            .submit(GenerationRequest {
                prompt: "forest".to_string(),
                ..Default::default()
            })
            .await;
        client.await_result(handle).await.unwrap();

        let err = client.await_result(handle).await.unwrap_err();
        assert!(matches!(err, Error::UnknownHandle(_)));
    }

    #[tokio::test]
    async fn cancel_of_unknown_handle_is_an_error() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();

        let err = client.cancel(GenerationHandle(999)).await.unwrap_err();
        assert!(matches!(err, Error::UnknownHandle(999)));
    }

    #[tokio::test]
    async fn cancelled_generation_resolves_with_abort_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_json(3, "pending")))
            .mount(&server)
            .await;
        // Never reaches a terminal status on its own.
        Mock::given(method("GET"))
            .and(path("/generation/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_json(3, "processing")))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/generation/3"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();

        let handle = client
            .submit(GenerationRequest {
                prompt: "forest".to_string(),
                ..Default::default()
            })
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        client.cancel(handle).await.unwrap();

        let result = client.await_result(handle).await.unwrap();
        assert_eq!(result.status(), Status::Abort);
        assert!(result.artifacts.is_empty());
    }

    #[tokio::test]
    async fn fetch_job_reads_the_status_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/generation/8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_json(8, "processing")))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();

        let job = client.fetch_job(JobId(8)).await.unwrap();
        assert_eq!(job.status, Status::Processing);
    }

    #[tokio::test]
    async fn shutdown_cancels_and_drains_active_generations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_json(4, "pending")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/generation/4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_json(4, "processing")))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/generation/4"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();

        let handle = client
            .submit(GenerationRequest {
                prompt: "forest".to_string(),
                ..Default::default()
            })
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        client.shutdown().await;

        let err = client.await_result(handle).await.unwrap_err();
        assert!(matches!(err, Error::UnknownHandle(_)));
    }

    #[tokio::test]
    async fn cached_artifact_lookup_is_a_miss_before_any_download() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();

        assert!(
            client
                .try_resolve_cached("https://cdn.example.com/sky.png")
                .is_none()
        );

        let empty_result = GenerationResult {
            job: serde_json::from_value(job_json(5, "complete")).unwrap(),
            artifacts: HashMap::new(),
            failures: HashMap::new(),
        };
        assert!(
            client
                .try_get_cached_artifact(&empty_result, ArtifactKind::EquirectangularPng)
                .is_none()
        );
    }
}
