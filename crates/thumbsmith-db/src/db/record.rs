//! Video record repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use thumbsmith_core::models::{ArtifactSwap, TargetRecord, UploadedArtifact};

use super::traits::RecordStore;

#[derive(Debug, FromRow)]
struct VideoThumbnailRow {
    id: Uuid,
    user_id: Uuid,
    thumbnail_key: Option<String>,
    thumbnail_url: Option<String>,
}

impl From<VideoThumbnailRow> for TargetRecord {
    fn from(row: VideoThumbnailRow) -> Self {
        TargetRecord {
            id: row.id.to_string(),
            owner_id: row.user_id.to_string(),
            current_artifact_key: row.thumbnail_key,
            current_artifact_url: row.thumbnail_url,
        }
    }
}

/// Parse both ids; a malformed id cannot match any row.
fn parse_ids(record_id: &str, owner_id: &str) -> Option<(Uuid, Uuid)> {
    let record_id = Uuid::parse_str(record_id).ok()?;
    let owner_id = Uuid::parse_str(owner_id).ok()?;
    Some((record_id, owner_id))
}

#[derive(Clone)]
pub struct VideoRepository {
    pool: PgPool,
}

impl VideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for VideoRepository {
    async fn load(&self, record_id: &str, owner_id: &str) -> Result<Option<TargetRecord>> {
        let Some((record_id, owner_id)) = parse_ids(record_id, owner_id) else {
            return Ok(None);
        };

        let row = sqlx::query_as::<Postgres, VideoThumbnailRow>(
            r#"
            SELECT id, user_id, thumbnail_key, thumbnail_url
            FROM videos
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(record_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load video")?;

        Ok(row.map(TargetRecord::from))
    }

    async fn swap_artifact(
        &self,
        record_id: &str,
        owner_id: &str,
        artifact: &UploadedArtifact,
    ) -> Result<ArtifactSwap> {
        let Some((record_id, owner_id)) = parse_ids(record_id, owner_id) else {
            return Ok(ArtifactSwap::not_applied());
        };

        // The row lock in `prev` makes the returned key the value this update replaced.
        let previous: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            WITH prev AS (
                SELECT id, thumbnail_key
                FROM videos
                WHERE id = $1 AND user_id = $2
                FOR UPDATE
            )
            UPDATE videos v
            SET thumbnail_key = $3,
                thumbnail_url = $4,
                updated_at = NOW()
            FROM prev
            WHERE v.id = prev.id
            RETURNING prev.thumbnail_key
            "#,
        )
        .bind(record_id)
        .bind(owner_id)
        .bind(&artifact.key)
        .bind(&artifact.url)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update video thumbnail")?;

        Ok(match previous {
            Some((previous_key,)) => ArtifactSwap {
                rows_affected: 1,
                previous_key,
            },
            None => ArtifactSwap::not_applied(),
        })
    }
}
