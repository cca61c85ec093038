use crate::config::{DatabaseConfig, SwapPolicy};
use crate::error::VideoError;
use crate::models::{InsertOutcome, NewProgramVideo, Program, ProgramVideo, SwapOutcome};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{debug, info, instrument};

/// Relational storage for programs and their videos
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Load a program together with its videos (ordered by ord)
    async fn find_program(&self, program_id: i64) -> Result<Option<Program>, VideoError>;

    /// Find the video at `ord` of a program
    async fn find_video(&self, program_id: i64, ord: i64)
        -> Result<Option<ProgramVideo>, VideoError>;

    /// Insert a video unless its (program, ord) is already taken.
    ///
    /// The check and the insert happen atomically with respect to other
    /// inserts and swaps on the same program.
    async fn insert_video(&self, video: NewProgramVideo) -> Result<InsertOutcome, VideoError>;

    /// Reassign ords between `ord_1` and `ord_2`; `None` if neither is taken
    async fn swap_ord(
        &self,
        program_id: i64,
        ord_1: i64,
        ord_2: i64,
        policy: SwapPolicy,
    ) -> Result<Option<SwapOutcome>, VideoError>;

    /// Delete a video row by ID
    async fn delete_video(&self, video_id: i64) -> Result<(), VideoError>;

    /// Connectivity check used by readiness
    async fn ping(&self) -> Result<(), VideoError>;
}

const VIDEO_COLUMNS: &str = r#"
    id, program_id, ord, act_name,
    video_url, video_object_path, json_url, json_object_path,
    created_at, updated_at
"#;

/// PostgreSQL-backed repository
pub struct PgVideoRepository {
    pool: PgPool,
}

impl PgVideoRepository {
    /// Create a new repository with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Lock the program row for the rest of the transaction
    async fn lock_program(
        tx: &mut Transaction<'_, Postgres>,
        program_id: i64,
    ) -> Result<(), VideoError> {
        let locked: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM programs WHERE id = $1 FOR UPDATE")
                .bind(program_id)
                .fetch_optional(&mut **tx)
                .await?;

        locked.map(|_| ()).ok_or(VideoError::NotFound(program_id))
    }

    async fn video_at(
        tx: &mut Transaction<'_, Postgres>,
        program_id: i64,
        ord: i64,
    ) -> Result<Option<ProgramVideo>, VideoError> {
        let sql = format!(
            "SELECT {VIDEO_COLUMNS} FROM program_videos \
             WHERE program_id = $1 AND ord = $2 ORDER BY id LIMIT 1"
        );
        let video = sqlx::query_as::<_, ProgramVideo>(&sql)
            .bind(program_id)
            .bind(ord)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(video)
    }

    async fn set_ord(
        tx: &mut Transaction<'_, Postgres>,
        video_id: i64,
        ord: i64,
    ) -> Result<(), VideoError> {
        sqlx::query("UPDATE program_videos SET ord = $2, updated_at = NOW() WHERE id = $1")
            .bind(video_id)
            .bind(ord)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    #[instrument(skip(self))]
    async fn find_program(&self, program_id: i64) -> Result<Option<Program>, VideoError> {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM programs WHERE id = $1")
            .bind(program_id)
            .fetch_optional(&self.pool)
            .await?;

        if exists.is_none() {
            return Ok(None);
        }

        let sql = format!(
            "SELECT {VIDEO_COLUMNS} FROM program_videos WHERE program_id = $1 ORDER BY ord, id"
        );
        let videos = sqlx::query_as::<_, ProgramVideo>(&sql)
            .bind(program_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(Some(Program::new(program_id, videos)))
    }

    async fn find_video(
        &self,
        program_id: i64,
        ord: i64,
    ) -> Result<Option<ProgramVideo>, VideoError> {
        let sql = format!(
            "SELECT {VIDEO_COLUMNS} FROM program_videos \
             WHERE program_id = $1 AND ord = $2 ORDER BY id LIMIT 1"
        );
        let video = sqlx::query_as::<_, ProgramVideo>(&sql)
            .bind(program_id)
            .bind(ord)
            .fetch_optional(&self.pool)
            .await?;

        Ok(video)
    }

    #[instrument(skip(self, video), fields(program_id = video.program_id, ord = video.ord))]
    async fn insert_video(&self, video: NewProgramVideo) -> Result<InsertOutcome, VideoError> {
        let mut tx = self.pool.begin().await?;

        Self::lock_program(&mut tx, video.program_id).await?;

        if Self::video_at(&mut tx, video.program_id, video.ord)
            .await?
            .is_some()
        {
            tx.rollback().await?;
            return Ok(InsertOutcome::OrdTaken);
        }

        let sql = format!(
            r#"
            INSERT INTO program_videos (
                program_id, ord, act_name,
                video_url, video_object_path, json_url, json_object_path,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, NOW(), NOW()
            )
            RETURNING {VIDEO_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, ProgramVideo>(&sql)
            .bind(video.program_id)
            .bind(video.ord)
            .bind(&video.act_name)
            .bind(&video.files.video_url)
            .bind(&video.files.video_object_path)
            .bind(&video.files.json_url)
            .bind(&video.files.json_object_path)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(video_id = inserted.id, "Program video inserted");
        Ok(InsertOutcome::Inserted(inserted))
    }

    #[instrument(skip(self))]
    async fn swap_ord(
        &self,
        program_id: i64,
        ord_1: i64,
        ord_2: i64,
        policy: SwapPolicy,
    ) -> Result<Option<SwapOutcome>, VideoError> {
        let mut tx = self.pool.begin().await?;

        Self::lock_program(&mut tx, program_id).await?;

        let first = Self::video_at(&mut tx, program_id, ord_1).await?;
        let second = Self::video_at(&mut tx, program_id, ord_2).await?;

        let outcome = match plan_swap(first.as_ref(), second.as_ref(), ord_1, ord_2, policy) {
            Some(outcome) => outcome,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        match outcome {
            SwapOutcome::Moved { video_id, to, .. } => {
                Self::set_ord(&mut tx, video_id, to).await?;
            }
            SwapOutcome::Exchanged {
                first_id,
                second_id,
            } => {
                Self::set_ord(&mut tx, first_id, ord_2).await?;
                Self::set_ord(&mut tx, second_id, ord_1).await?;
            }
        }

        tx.commit().await?;

        Ok(Some(outcome))
    }

    #[instrument(skip(self))]
    async fn delete_video(&self, video_id: i64) -> Result<(), VideoError> {
        sqlx::query("DELETE FROM program_videos WHERE id = $1")
            .bind(video_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), VideoError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Decide which rows a swap touches.
///
/// Under [`SwapPolicy::Literal`] only one row ever moves: the `ord_1` row if
/// it exists, otherwise the `ord_2` row. When both exist the `ord_2` row
/// keeps its ord, leaving two rows at `ord_2`.
pub fn plan_swap(
    first: Option<&ProgramVideo>,
    second: Option<&ProgramVideo>,
    ord_1: i64,
    ord_2: i64,
    policy: SwapPolicy,
) -> Option<SwapOutcome> {
    match (first, second) {
        (None, None) => None,
        (Some(a), Some(b)) if policy == SwapPolicy::Symmetric && a.id != b.id => {
            Some(SwapOutcome::Exchanged {
                first_id: a.id,
                second_id: b.id,
            })
        }
        (Some(a), _) => Some(SwapOutcome::Moved {
            video_id: a.id,
            from: ord_1,
            to: ord_2,
        }),
        (None, Some(b)) => Some(SwapOutcome::Moved {
            video_id: b.id,
            from: ord_2,
            to: ord_1,
        }),
    }
}
