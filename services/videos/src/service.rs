//! Video asset management for program steps.
//!
//! A program step ("ord") carries a guide video and a motion-tracking json
//! file. Both are staged locally, pushed to object storage with public read
//! access, and referenced from a `program_videos` row.

use crate::config::SwapPolicy;
use crate::error::VideoError;
use crate::models::{
    InsertOutcome, NewProgramVideo, Program, ProgramVideo, SwapOrdRequest, SwapOutcome,
    UploadFile, UploadedFiles, VideoUploadRequest,
};
use crate::object_store::ObjectStore;
use crate::repository::VideoRepository;
use crate::upload::{
    content_type_for, materialize_upload, sanitize_file_name, JSON_PREFIX, VIDEO_PREFIX,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Orchestrates video uploads, deletions and ord changes
pub struct VideoService {
    repository: Arc<dyn VideoRepository>,
    store: Arc<dyn ObjectStore>,
    temp_dir: PathBuf,
    swap_policy: SwapPolicy,
}

impl VideoService {
    pub fn new(
        repository: Arc<dyn VideoRepository>,
        store: Arc<dyn ObjectStore>,
        temp_dir: PathBuf,
        swap_policy: SwapPolicy,
    ) -> Self {
        Self {
            repository,
            store,
            temp_dir,
            swap_policy,
        }
    }

    async fn program(&self, program_id: i64) -> Result<Program, VideoError> {
        self.repository
            .find_program(program_id)
            .await?
            .ok_or(VideoError::NotFound(program_id))
    }

    /// Attach a video/json pair to `ord` of a program
    #[instrument(skip(self, request), fields(act_name = %request.act_name))]
    pub async fn create_video(
        &self,
        program_id: i64,
        ord: i64,
        request: VideoUploadRequest,
    ) -> Result<ProgramVideo, VideoError> {
        let mut program = self.program(program_id).await?;

        let (video, json) = match (request.video, request.json) {
            (Some(video), Some(json)) if !video.is_empty() && !json.is_empty() => (video, json),
            _ => return Err(VideoError::empty_files()),
        };

        if request.act_name.trim().is_empty() {
            return Err(VideoError::missing_act_name());
        }

        if self.repository.find_video(program_id, ord).await?.is_some() {
            return Err(VideoError::duplicate_ord());
        }

        let files = self.upload_files(&video, &json).await?;

        let new_video = NewProgramVideo {
            program_id,
            ord,
            act_name: request.act_name,
            files: files.clone(),
        };

        let video = match self.repository.insert_video(new_video).await {
            Ok(InsertOutcome::Inserted(video)) => video,
            Ok(InsertOutcome::OrdTaken) => {
                warn!(program_id, ord, "Ord taken while uploading, discarding objects");
                self.delete_files(&files.video_object_path, &files.json_object_path)
                    .await;
                return Err(VideoError::duplicate_ord());
            }
            Err(e) => {
                self.delete_files(&files.video_object_path, &files.json_object_path)
                    .await;
                return Err(e);
            }
        };

        program.record_video(video.clone());

        info!(
            program_id,
            ord,
            video_id = video.id,
            video_count = program.video_count(),
            "Program video created"
        );
        metrics::counter!("videos.created").increment(1);

        Ok(video)
    }

    /// Remove the video at `ord` together with its stored objects
    #[instrument(skip(self))]
    pub async fn delete_video(&self, program_id: i64, ord: i64) -> Result<(), VideoError> {
        self.program(program_id).await?;

        let video = self
            .repository
            .find_video(program_id, ord)
            .await?
            .ok_or_else(VideoError::invalid_ord)?;

        // Storage failures do not stop the row from going away
        self.delete_files(&video.video_object_path, &video.json_object_path)
            .await;

        self.repository.delete_video(video.id).await?;

        info!(program_id, ord, video_id = video.id, "Program video deleted");
        metrics::counter!("videos.deleted").increment(1);

        Ok(())
    }

    /// Move videos between two ords according to the configured policy
    #[instrument(skip(self))]
    pub async fn swap_video_ord(
        &self,
        program_id: i64,
        request: SwapOrdRequest,
    ) -> Result<SwapOutcome, VideoError> {
        self.program(program_id).await?;

        let outcome = self
            .repository
            .swap_ord(program_id, request.ord_1, request.ord_2, self.swap_policy)
            .await?
            .ok_or_else(VideoError::invalid_ord)?;

        info!(program_id, outcome = ?outcome, "Program video ord modified");
        metrics::counter!("videos.swapped").increment(1);

        Ok(outcome)
    }

    /// Videos of a program ordered by ord
    pub async fn list_videos(&self, program_id: i64) -> Result<Vec<ProgramVideo>, VideoError> {
        Ok(self.program(program_id).await?.videos().to_vec())
    }

    /// Readiness of the relational store
    pub async fn ready(&self) -> Result<(), VideoError> {
        self.repository.ping().await
    }

    /// Stage both files locally, upload them and make them publicly readable.
    ///
    /// Local copies are removed on every exit path.
    pub async fn upload_files(
        &self,
        video: &UploadFile,
        json: &UploadFile,
    ) -> Result<UploadedFiles, VideoError> {
        let prefix = Uuid::new_v4();
        let video_name = format!("{}_{}", prefix, sanitize_file_name(&video.file_name));
        let json_name = format!("{}_{}", prefix, sanitize_file_name(&json.file_name));

        let local_video = materialize_upload(&self.temp_dir, &video.data, &video_name)
            .await
            .map_err(|e| VideoError::StorageFailure(e.into()))?;
        let local_json = materialize_upload(&self.temp_dir, &json.data, &json_name)
            .await
            .map_err(|e| VideoError::StorageFailure(e.into()))?;

        let video_object_path = format!("{VIDEO_PREFIX}{video_name}");
        let json_object_path = format!("{JSON_PREFIX}{json_name}");

        self.store
            .put_file(
                &video_object_path,
                local_video.path(),
                &content_type_for(&video_name, video.content_type.as_deref()),
            )
            .await?;
        self.store
            .put_file(
                &json_object_path,
                local_json.path(),
                &content_type_for(&json_name, json.content_type.as_deref()),
            )
            .await?;

        let files = UploadedFiles {
            video_url: self.store.public_url(&video_object_path),
            video_object_path,
            json_url: self.store.public_url(&json_object_path),
            json_object_path,
        };

        for key in [&files.video_object_path, &files.json_object_path] {
            self.store.grant_public_read(key).await.map_err(|e| {
                error!(key = %key, error = %e, "Failed to grant public read; check bucket ACL settings");
                VideoError::StorageFailure(e)
            })?;
        }

        info!(
            video_url = %files.video_url,
            json_url = %files.json_url,
            "Files uploaded"
        );

        Ok(files)
    }

    /// Best-effort removal of a video/json object pair
    pub async fn delete_files(&self, video_object_path: &str, json_object_path: &str) {
        for key in [video_object_path, json_object_path] {
            if let Err(e) = self.store.delete_object(key).await {
                warn!(key = %key, error = %e, "Failed to delete object");
                metrics::counter!("videos.objects.delete_failed").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::{MockObjectStore, ObjectStoreError};
    use crate::repository::memory::MemoryVideoRepository;
    use bytes::Bytes;

    fn file(name: &str, data: &'static [u8]) -> UploadFile {
        UploadFile {
            file_name: name.to_string(),
            content_type: None,
            data: Bytes::from_static(data),
        }
    }

    fn squat_request() -> VideoUploadRequest {
        VideoUploadRequest {
            video: Some(file("video.mp4", b"\x00\x00\x00\x18ftypmp42")),
            json: Some(file("guide.json", b"{\"frames\":[]}")),
            act_name: "squat".to_string(),
        }
    }

    fn accepting_store() -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store.expect_put_file().returning(|_, path, _| {
            assert!(path.exists(), "staged file must exist during upload");
            Ok(())
        });
        store
            .expect_public_url()
            .returning(|key| format!("https://kr.object.ncloudstorage.com/rehab/{key}"));
        store.expect_grant_public_read().returning(|_| Ok(()));
        store
    }

    fn service(repo: Arc<MemoryVideoRepository>, store: MockObjectStore) -> VideoService {
        VideoService::new(repo, Arc::new(store), std::env::temp_dir(), SwapPolicy::Literal)
    }

    async fn seed(repo: &MemoryVideoRepository, program_id: i64, ord: i64, act: &str) -> i64 {
        let outcome = repo
            .insert_video(NewProgramVideo {
                program_id,
                ord,
                act_name: act.to_string(),
                files: UploadedFiles {
                    video_url: format!("https://host/rehab/video/{act}.mp4"),
                    video_object_path: format!("video/{act}.mp4"),
                    json_url: format!("https://host/rehab/json/{act}.json"),
                    json_object_path: format!("json/{act}.json"),
                },
            })
            .await
            .unwrap();
        match outcome {
            InsertOutcome::Inserted(v) => v.id,
            InsertOutcome::OrdTaken => panic!("seed ord taken"),
        }
    }

    #[tokio::test]
    async fn test_unknown_program_is_not_found_without_side_effects() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        // No expectations: any store call would panic
        let svc = service(repo.clone(), MockObjectStore::new());

        let err = svc.create_video(7, 1, squat_request()).await.unwrap_err();
        assert!(matches!(err, VideoError::NotFound(7)));

        let err = svc.delete_video(7, 1).await.unwrap_err();
        assert!(matches!(err, VideoError::NotFound(7)));

        let err = svc
            .swap_video_ord(7, SwapOrdRequest { ord_1: 1, ord_2: 2 })
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::NotFound(7)));

        assert!(matches!(svc.list_videos(7).await, Err(VideoError::NotFound(7))));
        assert!(repo.videos(42).is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_performs_no_writes() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        let svc = service(repo.clone(), MockObjectStore::new());

        let mut empty_json = squat_request();
        empty_json.json = Some(file("guide.json", b""));
        let mut empty_video = squat_request();
        empty_video.video = Some(file("video.mp4", b""));
        let mut missing_json = squat_request();
        missing_json.json = None;

        for request in [empty_json, empty_video, missing_json] {
            let err = svc.create_video(42, 1, request).await.unwrap_err();
            assert!(
                matches!(err, VideoError::InvalidInput(ref m) if m == "Please select files to upload")
            );
        }
        assert!(repo.videos(42).is_empty());
    }

    #[tokio::test]
    async fn test_missing_files_on_unknown_program_is_not_found() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        let svc = service(repo, MockObjectStore::new());

        let request = VideoUploadRequest {
            video: None,
            json: None,
            act_name: String::new(),
        };
        let err = svc.create_video(7, 1, request).await.unwrap_err();
        assert!(matches!(err, VideoError::NotFound(7)));
    }

    #[tokio::test]
    async fn test_blank_act_name_rejected_before_upload() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        let svc = service(repo.clone(), MockObjectStore::new());

        let mut request = squat_request();
        request.act_name = "  ".to_string();

        let err = svc.create_video(42, 1, request).await.unwrap_err();
        assert!(matches!(err, VideoError::InvalidInput(ref m) if m == "Please enter act name"));
        assert!(repo.videos(42).is_empty());
    }

    #[tokio::test]
    async fn test_create_then_duplicate_ord() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        let mut store = MockObjectStore::new();
        store.expect_put_file().times(2).returning(|_, _, _| Ok(()));
        store
            .expect_public_url()
            .times(2)
            .returning(|key| format!("https://kr.object.ncloudstorage.com/rehab/{key}"));
        store.expect_grant_public_read().times(2).returning(|_| Ok(()));
        let svc = service(repo.clone(), store);

        let video = svc.create_video(42, 1, squat_request()).await.unwrap();
        assert_eq!(video.ord, 1);
        assert_eq!(video.act_name, "squat");
        assert!(video.video_object_path.starts_with("video/"));
        assert!(video.video_object_path.ends_with("_video.mp4"));
        assert!(video.json_object_path.starts_with("json/"));
        assert!(video.json_object_path.ends_with("_guide.json"));
        assert_eq!(
            video.video_url,
            format!("https://kr.object.ncloudstorage.com/rehab/{}", video.video_object_path)
        );

        // Both keys share the same unique prefix
        let video_prefix = video.video_object_path["video/".len()..].split('_').next();
        let json_prefix = video.json_object_path["json/".len()..].split('_').next();
        assert_eq!(video_prefix, json_prefix);

        let err = svc.create_video(42, 1, squat_request()).await.unwrap_err();
        assert!(matches!(err, VideoError::Conflict(ref m) if m == "already exists ord"));
        assert_eq!(repo.videos(42).len(), 1);
    }

    #[tokio::test]
    async fn test_acl_failure_is_storage_failure() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        let mut store = MockObjectStore::new();
        store.expect_put_file().returning(|_, _, _| Ok(()));
        store.expect_public_url().returning(|key| key.to_string());
        store.expect_grant_public_read().returning(|key| {
            Err(ObjectStoreError::AccessControl {
                key: key.to_string(),
                message: "AccessDenied".to_string(),
            })
        });
        let svc = service(repo.clone(), store);

        let err = svc.create_video(42, 1, squat_request()).await.unwrap_err();
        assert!(matches!(
            err,
            VideoError::StorageFailure(ObjectStoreError::AccessControl { .. })
        ));
        assert!(repo.videos(42).is_empty());
    }

    /// Ord lookups miss existing rows, as when a concurrent create commits
    /// between the pre-check and the insert
    struct StaleLookupRepository {
        inner: Arc<MemoryVideoRepository>,
    }

    #[async_trait::async_trait]
    impl VideoRepository for StaleLookupRepository {
        async fn find_program(&self, program_id: i64) -> Result<Option<Program>, VideoError> {
            self.inner.find_program(program_id).await
        }

        async fn find_video(
            &self,
            _program_id: i64,
            _ord: i64,
        ) -> Result<Option<ProgramVideo>, VideoError> {
            Ok(None)
        }

        async fn insert_video(&self, video: NewProgramVideo) -> Result<InsertOutcome, VideoError> {
            self.inner.insert_video(video).await
        }

        async fn swap_ord(
            &self,
            program_id: i64,
            ord_1: i64,
            ord_2: i64,
            policy: SwapPolicy,
        ) -> Result<Option<SwapOutcome>, VideoError> {
            self.inner.swap_ord(program_id, ord_1, ord_2, policy).await
        }

        async fn delete_video(&self, video_id: i64) -> Result<(), VideoError> {
            self.inner.delete_video(video_id).await
        }

        async fn ping(&self) -> Result<(), VideoError> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_ord_taken_at_insert_discards_uploaded_objects() {
        let memory = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        let winner = seed(&memory, 42, 1, "squat").await;

        let mut store = accepting_store();
        store
            .expect_delete_object()
            .withf(|key| {
                (key.starts_with("video/") && key.ends_with("_video.mp4"))
                    || (key.starts_with("json/") && key.ends_with("_guide.json"))
            })
            .times(2)
            .returning(|_| Ok(()));

        let svc = VideoService::new(
            Arc::new(StaleLookupRepository {
                inner: memory.clone(),
            }),
            Arc::new(store),
            std::env::temp_dir(),
            SwapPolicy::Literal,
        );

        let err = svc.create_video(42, 1, squat_request()).await.unwrap_err();
        assert!(matches!(err, VideoError::Conflict(ref m) if m == "already exists ord"));

        let videos = memory.videos(42);
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].id, winner);
    }

    #[tokio::test]
    async fn test_staged_files_removed_after_upload() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        let staged = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = staged.clone();

        let mut store = MockObjectStore::new();
        store.expect_put_file().returning(move |_, path, _| {
            seen.lock().unwrap().push(path.to_path_buf());
            Ok(())
        });
        store.expect_public_url().returning(|key| key.to_string());
        store.expect_grant_public_read().returning(|_| Ok(()));
        let svc = service(repo, store);

        svc.create_video(42, 3, squat_request()).await.unwrap();

        let staged = staged.lock().unwrap();
        assert_eq!(staged.len(), 2);
        assert!(staged.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn test_staged_files_removed_after_put_failure() {
        let svc_repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        let staged = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = staged.clone();

        let mut store = MockObjectStore::new();
        store.expect_put_file().returning(move |key, path, _| {
            seen.lock().unwrap().push(path.to_path_buf());
            Err(ObjectStoreError::Client {
                key: key.to_string(),
                message: "connection reset".to_string(),
            })
        });
        let svc = service(svc_repo, store);

        let err = svc.create_video(42, 3, squat_request()).await.unwrap_err();
        assert!(matches!(err, VideoError::StorageFailure(_)));

        let staged = staged.lock().unwrap();
        assert_eq!(staged.len(), 1);
        assert!(!staged[0].exists());
    }

    #[tokio::test]
    async fn test_delete_issues_two_object_deletes_even_when_failing() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        seed(&repo, 42, 1, "squat").await;

        let mut store = MockObjectStore::new();
        store
            .expect_delete_object()
            .withf(|key| key == "video/squat.mp4")
            .times(1)
            .returning(|key| {
                Err(ObjectStoreError::Client {
                    key: key.to_string(),
                    message: "timeout".to_string(),
                })
            });
        store
            .expect_delete_object()
            .withf(|key| key == "json/squat.json")
            .times(1)
            .returning(|_| Ok(()));
        let svc = service(repo.clone(), store);

        svc.delete_video(42, 1).await.unwrap();
        assert!(repo.videos(42).is_empty());

        let err = svc.delete_video(42, 1).await.unwrap_err();
        assert!(matches!(err, VideoError::InvalidInput(ref m) if m == "Please Select Valid Ord"));
    }

    #[tokio::test]
    async fn test_scenario_create_delete_program_42() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        let mut store = accepting_store();
        store.expect_delete_object().times(2).returning(|_| Ok(()));
        let svc = service(repo.clone(), store);

        svc.create_video(42, 1, squat_request()).await.unwrap();
        assert!(matches!(
            svc.create_video(42, 1, squat_request()).await,
            Err(VideoError::Conflict(_))
        ));

        svc.delete_video(42, 1).await.unwrap();
        assert!(repo.videos(42).is_empty());
        assert!(matches!(
            svc.delete_video(42, 1).await,
            Err(VideoError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_swap_literal_only_moves_first_row() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        let first = seed(&repo, 42, 1, "squat").await;
        let second = seed(&repo, 42, 2, "lunge").await;
        let svc = service(repo.clone(), MockObjectStore::new());

        let outcome = svc
            .swap_video_ord(42, SwapOrdRequest { ord_1: 1, ord_2: 2 })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SwapOutcome::Moved {
                video_id: first,
                from: 1,
                to: 2
            }
        );

        let videos = repo.videos(42);
        assert_eq!(videos.len(), 2);
        assert!(videos.iter().all(|v| v.ord == 2));
        assert!(videos.iter().any(|v| v.id == second && v.act_name == "lunge"));
    }

    #[tokio::test]
    async fn test_swap_moves_second_when_first_missing() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        let second = seed(&repo, 42, 5, "lunge").await;
        let svc = service(repo.clone(), MockObjectStore::new());

        svc.swap_video_ord(42, SwapOrdRequest { ord_1: 1, ord_2: 5 })
            .await
            .unwrap();

        let videos = repo.videos(42);
        assert_eq!(videos.len(), 1);
        assert_eq!((videos[0].id, videos[0].ord), (second, 1));
    }

    #[tokio::test]
    async fn test_swap_neither_ord_exists() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        seed(&repo, 42, 3, "plank").await;
        let svc = service(repo.clone(), MockObjectStore::new());

        let err = svc
            .swap_video_ord(42, SwapOrdRequest { ord_1: 1, ord_2: 2 })
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::InvalidInput(_)));
        assert_eq!(repo.videos(42)[0].ord, 3);
    }

    #[tokio::test]
    async fn test_swap_symmetric_exchanges_both_rows() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        let first = seed(&repo, 42, 1, "squat").await;
        let second = seed(&repo, 42, 2, "lunge").await;
        let svc = VideoService::new(
            repo.clone(),
            Arc::new(MockObjectStore::new()),
            std::env::temp_dir(),
            SwapPolicy::Symmetric,
        );

        svc.swap_video_ord(42, SwapOrdRequest { ord_1: 1, ord_2: 2 })
            .await
            .unwrap();

        let videos = repo.videos(42);
        let ord_of = |id: i64| videos.iter().find(|v| v.id == id).map(|v| v.ord);
        assert_eq!(ord_of(first), Some(2));
        assert_eq!(ord_of(second), Some(1));
    }

    #[tokio::test]
    async fn test_list_videos_ordered() {
        let repo = Arc::new(MemoryVideoRepository::with_programs(&[42]));
        seed(&repo, 42, 3, "plank").await;
        seed(&repo, 42, 1, "squat").await;
        let svc = service(repo, MockObjectStore::new());

        let ords: Vec<i64> = svc
            .list_videos(42)
            .await
            .unwrap()
            .iter()
            .map(|v| v.ord)
            .collect();
        assert_eq!(ords, vec![1, 3]);
    }
}
