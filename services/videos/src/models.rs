use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One ordered step of a program: a guide video and its motion-tracking json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProgramVideo {
    /// Row ID
    pub id: i64,
    /// Owning program
    pub program_id: i64,
    /// Position of the step within the program
    pub ord: i64,
    /// Activity shown in the video (e.g. "squat")
    pub act_name: String,
    /// Public URL of the guide video
    pub video_url: String,
    /// Object key of the guide video
    pub video_object_path: String,
    /// Public URL of the motion-tracking json
    pub json_url: String,
    /// Object key of the motion-tracking json
    pub json_object_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Program aggregate as seen by the video service.
///
/// Programs themselves are created and removed by program management; this
/// side only reads them and records new videos against them.
#[derive(Debug, Clone)]
pub struct Program {
    id: i64,
    videos: Vec<ProgramVideo>,
}

impl Program {
    pub fn new(id: i64, videos: Vec<ProgramVideo>) -> Self {
        Self { id, videos }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Videos of this program, ordered by ord
    pub fn videos(&self) -> &[ProgramVideo] {
        &self.videos
    }

    pub fn video_count(&self) -> usize {
        self.videos.len()
    }

    /// Record a freshly persisted video on the aggregate
    pub fn record_video(&mut self, video: ProgramVideo) {
        debug_assert_eq!(video.program_id, self.id);
        let at = self.videos.partition_point(|v| v.ord <= video.ord);
        self.videos.insert(at, video);
    }
}

/// Storage locations produced by uploading a video/json pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFiles {
    pub video_url: String,
    pub video_object_path: String,
    pub json_url: String,
    pub json_object_path: String,
}

/// A video row ready to be inserted
#[derive(Debug, Clone)]
pub struct NewProgramVideo {
    pub program_id: i64,
    pub ord: i64,
    pub act_name: String,
    pub files: UploadedFiles,
}

/// A file received in an upload request
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Original filename as sent by the client
    pub file_name: String,
    /// Declared content type, if any
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadFile {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Create-video request: guide video, motion-tracking json and activity name.
///
/// Files are optional here so that a missing part is reported only after the
/// program has been resolved.
#[derive(Debug, Clone)]
pub struct VideoUploadRequest {
    pub video: Option<UploadFile>,
    pub json: Option<UploadFile>,
    pub act_name: String,
}

/// Swap-ord request body
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SwapOrdRequest {
    pub ord_1: i64,
    pub ord_2: i64,
}

/// Result of a conditional insert
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(ProgramVideo),
    /// Another row already holds the (program, ord) pair
    OrdTaken,
}

/// What a swap actually changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// One row moved from `from` to `to`
    Moved { video_id: i64, from: i64, to: i64 },
    /// Two rows exchanged their ords
    Exchanged { first_id: i64, second_id: i64 },
}
