//! # skygen
//!
//! Client library for asynchronous AI skybox generation services.
//!
//! ## Design Philosophy
//!
//! skygen is designed to be:
//! - **Job-oriented** - Generations are long-running remote jobs with an
//!   explicit status state machine, not request/response calls
//! - **Sensible defaults** - Works out of the box with zero configuration
//!   beyond a base URL and API key
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to a broadcast event stream;
//!   push notifications are used when available, with polling as the
//!   always-correct fallback
//!
//! ## Quick Start
//!
//! ```no_run
//! use skygen::{ArtifactKind, Config, GenerationRequest, SkygenClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.api.base_url = "https://api.example.com".to_string();
//!     config.api.api_key = "secret".to_string();
//!
//!     let client = SkygenClient::new(config)?;
//!
//!     // Subscribe to lifecycle events
//!     let mut events = client.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let result = client
//!         .generate(GenerationRequest {
//!             prompt: "misty redwood forest at dawn".to_string(),
//!             exports: vec![ArtifactKind::EquirectangularPng, ArtifactKind::CubemapPng],
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     if let Some(artifact) = result.artifact(ArtifactKind::EquirectangularPng) {
//!         println!("panorama cached at {:?}", artifact.path());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// URL-addressed artifact cache
pub mod cache;
/// Cooperative cancellation coordination
pub mod cancel;
/// Public client surface
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Export sub-job orchestration
mod export;
/// Generation job orchestration
mod generation;
/// Push-channel transport for status notifications
pub mod push;
/// Retry logic with exponential backoff
pub mod retry;
/// Job status tracking strategies
pub mod tracker;
/// HTTP transport for the generation service
pub mod transport;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use cache::ArtifactCache;
pub use cancel::CancellationCoordinator;
pub use client::{GenerationHandle, SkygenClient};
pub use config::{ApiConfig, CacheConfig, Config, RetryConfig, TrackingConfig};
pub use error::{CacheError, Error, ExportError, Result, TransportError};
pub use push::{PushChannel, PushSubscription, WebSocketPushChannel};
pub use tracker::{JobScope, PollingTracker, PushTracker, StatusTracker, WaitOutcome};
pub use types::{
    ArtifactKind, ArtifactPayload, CubeFace, Cubemap, Event, GenerationRequest, GenerationResult,
    Job, JobId, Materialization, RateLimitInfo, RemixSource, Status,
};
