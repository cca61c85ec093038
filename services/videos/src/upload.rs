//! Local staging of uploaded files before they are pushed to object storage.

use std::path::{Path, PathBuf};
use tracing::warn;

/// Key prefix for guide videos
pub const VIDEO_PREFIX: &str = "video/";
/// Key prefix for motion-tracking json files
pub const JSON_PREFIX: &str = "json/";

/// A local temporary copy of an uploaded file, removed when dropped
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove temporary upload");
            }
        }
    }
}

/// Write an uploaded payload to `dir/target_name`.
///
/// The caller makes `target_name` unique; the returned guard owns the file.
pub async fn materialize_upload(
    dir: &Path,
    data: &[u8],
    target_name: &str,
) -> std::io::Result<TempUpload> {
    let upload = TempUpload {
        path: dir.join(target_name),
    };
    tokio::fs::write(&upload.path, data).await?;
    Ok(upload)
}

/// Keep a client filename usable as a single path component
pub fn sanitize_file_name(name: &str) -> String {
    // Browsers may send a full client-side path
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Content type for an uploaded file, preferring the declared one
pub fn content_type_for(file_name: &str, declared: Option<&str>) -> String {
    if let Some(declared) = declared.filter(|d| !d.is_empty() && *d != "application/octet-stream") {
        return declared.to_string();
    }

    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" => "video/mp4".to_string(),
        "webm" => "video/webm".to_string(),
        "mov" => "video/quicktime".to_string(),
        "json" => "application/json".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}
