//! Core types for skygen

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique numeric identifier for a remote job (generation or export)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Create a new JobId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<JobId> for i64 {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Remote job status
///
/// `Pending`, `Dispatched` and `Processing` are non-terminal; `Complete`,
/// `Abort` and `Error` are terminal. A job that has reached a terminal
/// status is never mutated again by the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Accepted by the service, waiting in queue
    Pending,
    /// Handed to a worker, not yet running
    Dispatched,
    /// Actively being generated
    Processing,
    /// Finished successfully
    Complete,
    /// Cancelled (usually via the cancel endpoint)
    Abort,
    /// Failed with a server-supplied error message
    Error,
}

impl Status {
    /// Returns true for `Complete`, `Abort` and `Error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Complete | Status::Abort | Status::Error)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Dispatched => "dispatched",
            Status::Processing => "processing",
            Status::Complete => "complete",
            Status::Abort => "abort",
            Status::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// A remote generation or export job as reported by the service
///
/// Both job kinds share this shape; generation jobs carry `prompt` and
/// `style_id`, export jobs carry `kind` and (once complete) `file_url`.
/// Unknown wire fields are ignored.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Job {
    /// Numeric job identifier
    pub id: JobId,
    /// Opaque public identifier, accepted by the status endpoints
    #[serde(default)]
    pub obfuscated_id: String,
    /// Current status
    pub status: Status,
    /// Position in the service queue while `Pending`
    #[serde(default)]
    pub queue_position: Option<u32>,
    /// Server-supplied message when `status` is `Error`
    #[serde(default)]
    pub error_message: Option<String>,
    /// Push-channel address for this job, when push delivery is available
    #[serde(default)]
    pub push_channel: Option<String>,
    /// Event name to listen for on `push_channel`
    #[serde(default)]
    pub push_event: Option<String>,
    /// Creation timestamp
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Prompt text (generation jobs)
    #[serde(default)]
    pub prompt: Option<String>,
    /// Style identifier (generation jobs)
    #[serde(default)]
    pub style_id: Option<i64>,
    /// Artifact kind slug (export jobs)
    #[serde(default)]
    pub kind: Option<String>,
    /// Download URL for the finished artifact (export jobs, once complete)
    #[serde(default)]
    pub file_url: Option<String>,
}

impl Job {
    /// The server-supplied error message, or a generic fallback
    pub fn error_message_or_default(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| "remote job failed without a message".to_string())
    }
}

/// How an artifact kind is turned into a caller-visible payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Materialization {
    /// One remote file, cached as-is (images, depth maps)
    SingleFile,
    /// A zip of six named cube faces, unpacked and assembled into a [`Cubemap`]
    CubeFaceArchive,
    /// Cached as an opaque file with no decoding (HDR/EXR, video)
    OpaqueBlob,
}

/// Exportable artifact kinds
///
/// A closed enum: adding a kind means adding a row to [`KIND_TABLE`], which
/// drives both slug parsing and materialization strategy selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Equirectangular panorama, PNG
    EquirectangularPng,
    /// Equirectangular panorama, JPEG
    EquirectangularJpg,
    /// Per-pixel depth map, PNG
    DepthMapPng,
    /// High-dynamic-range environment, Radiance HDR
    HdrHdr,
    /// High-dynamic-range environment, OpenEXR
    HdrExr,
    /// Rendered fly-through video, MP4
    VideoMp4,
    /// Zip archive of six cube faces, PNG
    CubemapPng,
}

/// Kind → (wire slug, materialization strategy) lookup table
pub const KIND_TABLE: &[(ArtifactKind, &str, Materialization)] = &[
    (
        ArtifactKind::EquirectangularPng,
        "equirectangular-png",
        Materialization::SingleFile,
    ),
    (
        ArtifactKind::EquirectangularJpg,
        "equirectangular-jpg",
        Materialization::SingleFile,
    ),
    (
        ArtifactKind::DepthMapPng,
        "depth-map-png",
        Materialization::SingleFile,
    ),
    (ArtifactKind::HdrHdr, "hdr-hdr", Materialization::OpaqueBlob),
    (ArtifactKind::HdrExr, "hdr-exr", Materialization::OpaqueBlob),
    (
        ArtifactKind::VideoMp4,
        "video-mp4",
        Materialization::OpaqueBlob,
    ),
    (
        ArtifactKind::CubemapPng,
        "cubemap-png",
        Materialization::CubeFaceArchive,
    ),
];

impl ArtifactKind {
    /// The wire slug used by the export endpoints
    pub fn slug(&self) -> &'static str {
        // The table is exhaustive over the enum.
        KIND_TABLE
            .iter()
            .find(|(kind, _, _)| kind == self)
            .map(|(_, slug, _)| *slug)
            .unwrap_or("unknown")
    }

    /// Parse a wire slug into a kind
    ///
    /// Returns `None` for unrecognized slugs; per the forward-compatibility
    /// policy, callers log and skip those rather than failing.
    pub fn parse(slug: &str) -> Option<Self> {
        KIND_TABLE
            .iter()
            .find(|(_, s, _)| *s == slug)
            .map(|(kind, _, _)| *kind)
    }

    /// The materialization strategy for this kind
    pub fn materialization(&self) -> Materialization {
        KIND_TABLE
            .iter()
            .find(|(kind, _, _)| kind == self)
            .map(|(_, _, m)| *m)
            .unwrap_or(Materialization::OpaqueBlob)
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// One face slot of an assembled cubemap
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CubeFace {
    /// Forward (+Z)
    Front,
    /// Backward (-Z)
    Back,
    /// Left (-X)
    Left,
    /// Right (+X)
    Right,
    /// Up (+Y)
    Top,
    /// Down (-Y)
    Bottom,
}

impl CubeFace {
    /// All faces in slot order
    pub const ALL: [CubeFace; 6] = [
        CubeFace::Front,
        CubeFace::Back,
        CubeFace::Left,
        CubeFace::Right,
        CubeFace::Top,
        CubeFace::Bottom,
    ];

    /// Slot index into [`Cubemap`] face storage
    pub fn index(&self) -> usize {
        match self {
            CubeFace::Front => 0,
            CubeFace::Back => 1,
            CubeFace::Left => 2,
            CubeFace::Right => 3,
            CubeFace::Top => 4,
            CubeFace::Bottom => 5,
        }
    }

    /// Human-readable slot name, matching the archive naming convention
    pub fn name(&self) -> &'static str {
        match self {
            CubeFace::Front => "front",
            CubeFace::Back => "back",
            CubeFace::Left => "left",
            CubeFace::Right => "right",
            CubeFace::Top => "top",
            CubeFace::Bottom => "bottom",
        }
    }

    /// Map an archive entry's file stem to a face slot
    ///
    /// Archives name faces with a trailing slot suffix, e.g. `skybox_front.png`
    /// or `front.png`. `top`/`up` and `bottom`/`down` are accepted as synonyms.
    pub fn from_stem(stem: &str) -> Option<Self> {
        let stem = stem.to_ascii_lowercase();
        let suffix = stem.rsplit(['_', '-']).next().unwrap_or(&stem);
        match suffix {
            "front" => Some(CubeFace::Front),
            "back" => Some(CubeFace::Back),
            "left" => Some(CubeFace::Left),
            "right" => Some(CubeFace::Right),
            "top" | "up" => Some(CubeFace::Top),
            "bottom" | "down" => Some(CubeFace::Bottom),
            _ => None,
        }
    }
}

/// A decoded set of six cube faces assembled from a face archive
#[derive(Clone, Debug)]
pub struct Cubemap {
    faces: [image::DynamicImage; 6],
}

impl Cubemap {
    /// Assemble a cubemap from faces in slot order (see [`CubeFace::index`])
    pub fn new(faces: [image::DynamicImage; 6]) -> Self {
        Self { faces }
    }

    /// The decoded image for one face slot
    pub fn face(&self, face: CubeFace) -> &image::DynamicImage {
        &self.faces[face.index()]
    }
}

/// Where an artifact's remix/derivation input comes from
#[derive(Clone, Debug)]
pub enum RemixSource {
    /// Derive from an existing completed job
    Job(JobId),
    /// Derive from an uploaded control image (sent as a multipart file field)
    ControlImage {
        /// Raw image bytes
        bytes: Vec<u8>,
        /// Filename reported in the multipart part
        filename: String,
    },
}

/// A generation request as submitted by the caller
#[derive(Clone, Debug, Default)]
pub struct GenerationRequest {
    /// Prompt text
    pub prompt: String,
    /// Optional negative prompt
    pub negative_prompt: Option<String>,
    /// Optional style identifier
    pub style_id: Option<i64>,
    /// Optional remix/derivation input, forwarded opaquely to the service
    pub remix: Option<RemixSource>,
    /// Artifact kinds to export once the primary job completes
    pub exports: Vec<ArtifactKind>,
}

/// A materialized artifact as returned to the caller
#[derive(Clone, Debug)]
pub enum ArtifactPayload {
    /// A cached file on disk
    File(PathBuf),
    /// An assembled in-memory cubemap
    Cubemap(Cubemap),
}

impl ArtifactPayload {
    /// The cached file path, if this payload is file-backed
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            ArtifactPayload::File(path) => Some(path),
            ArtifactPayload::Cubemap(_) => None,
        }
    }
}

/// The terminal, hydrated view of a generation returned to the caller
///
/// A generation is considered successful as long as the primary job
/// completed, even if some exports failed; per-kind export failures are
/// recorded in `failures`.
#[derive(Clone, Debug)]
pub struct GenerationResult {
    /// The primary job in its terminal state
    pub job: Job,
    /// Successfully materialized artifacts by kind
    pub artifacts: HashMap<ArtifactKind, ArtifactPayload>,
    /// Per-kind export failure messages (partial-failure diagnostics)
    pub failures: HashMap<ArtifactKind, String>,
}

impl GenerationResult {
    /// Terminal status of the primary job
    pub fn status(&self) -> Status {
        self.job.status
    }

    /// The materialized artifact for a kind, if it succeeded
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ArtifactPayload> {
        self.artifacts.get(&kind)
    }
}

/// Response shape of the job and export cancel endpoints
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CancelResponse {
    /// Whether the service accepted the cancel request
    pub success: bool,
    /// Rejection reason, when `success` is false
    #[serde(default)]
    pub error: Option<String>,
}

/// Rate-limit counters parsed from response headers
///
/// Advisory only; the client never blocks a request based on these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Requests remaining in the current window
    pub remaining: u32,
    /// Total requests allowed per window
    pub limit: u32,
}

/// Events emitted on the client's broadcast channel
#[derive(Clone, Debug)]
pub enum Event {
    /// A generation job was accepted by the service
    Submitted {
        /// The new job's identifier
        id: JobId,
    },
    /// A tracked job reported a (possibly unchanged) status
    StatusChanged {
        /// The job being tracked
        id: JobId,
        /// Reported status
        status: Status,
        /// Queue position while `Pending`, when known
        queue_position: Option<u32>,
    },
    /// An export sub-job was submitted
    ExportStarted {
        /// The primary generation job
        id: JobId,
        /// Artifact kind being exported
        kind: ArtifactKind,
    },
    /// An export finished and its artifact was materialized
    ExportFinished {
        /// The primary generation job
        id: JobId,
        /// Artifact kind that finished
        kind: ArtifactKind,
    },
    /// An export failed; sibling exports are unaffected
    ExportFailed {
        /// The primary generation job
        id: JobId,
        /// Artifact kind that failed
        kind: ArtifactKind,
        /// Failure message
        reason: String,
    },
    /// The generation reached `Complete` and all exports were awaited
    Completed {
        /// The completed job
        id: JobId,
    },
    /// The generation resolved as cancelled
    Cancelled {
        /// The cancelled job, when submission had already succeeded
        id: Option<JobId>,
    },
    /// The generation failed terminally
    Failed {
        /// The failed job, when submission had already succeeded
        id: Option<JobId>,
        /// Failure message
        reason: String,
    },
}
