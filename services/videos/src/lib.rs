//! Rehab Videos Service
//!
//! Manages the guide videos and motion-tracking json files attached to the
//! ordered steps ("ord") of a rehabilitation program. Files are staged
//! locally, uploaded to an S3-compatible bucket with public read access, and
//! indexed in PostgreSQL.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP (multipart)          Object storage            PostgreSQL
//! ┌──────────────┐          ┌──────────────┐          ┌────────────────┐
//! │ api          │          │ video/       │          │ programs       │
//! │              │          │ json/        │          │ program_videos │
//! └──────────────┘          └──────────────┘          └────────────────┘
//!        │                         ▲                          ▲
//!        ▼                         │                          │
//! ┌──────────────┐          ┌──────────────┐          ┌────────────────┐
//! │ VideoService │─────────▶│ ObjectStore  │          │ VideoRepository│
//! │              │─────────────────────────────────────▶│                │
//! └──────────────┘          └──────────────┘          └────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod object_store;
pub mod repository;
pub mod service;
pub mod upload;

pub use config::{Config, SwapPolicy};
pub use error::VideoError;
pub use models::{Program, ProgramVideo, SwapOrdRequest, SwapOutcome, VideoUploadRequest};
pub use object_store::{ObjectStore, ObjectStoreError, S3ObjectStore};
pub use repository::{PgVideoRepository, VideoRepository};
pub use service::VideoService;
