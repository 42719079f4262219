use std::collections::HashMap;

use anyhow::Context;
use axum::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::pagination::{Page, PaginationMeta};
use crate::verifications::repo_types::{
    FaceVerification, FaceVerificationRow, FaceVerificationWithMedia, Media, NewFaceVerification,
    NewMedia, VerificationFilters,
};

const VERIFICATION_COLUMNS: &str = "id, reference_image_id, uploaded_image_id, image_type, \
                                    result, confidence, duration, created_at";
const MEDIA_COLUMNS: &str = "id, filename, url, mime_type, size, created_at";

#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Inserts the media rows and the verification atomically.
    async fn create_with_media(
        &self,
        reference: Option<NewMedia>,
        uploaded: NewMedia,
        verification: NewFaceVerification,
    ) -> anyhow::Result<FaceVerificationWithMedia>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<FaceVerificationWithMedia>>;
    async fn find_all(
        &self,
        filters: &VerificationFilters,
        skip: i64,
        take: i64,
    ) -> anyhow::Result<Page<FaceVerificationWithMedia>>;
    /// Removes the record and its media rows, returning what was removed.
    async fn delete(&self, id: Uuid) -> anyhow::Result<Option<FaceVerificationWithMedia>>;
}

#[derive(Clone)]
pub struct PgVerificationStore {
    db: PgPool,
}

impl PgVerificationStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn media_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<HashMap<Uuid, Media>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = ANY($1)");
        let rows = sqlx::query_as::<_, Media>(&query)
            .bind(ids)
            .fetch_all(&self.db)
            .await
            .context("load media")?;
        Ok(rows.into_iter().map(|m| (m.id, m)).collect())
    }

    async fn attach_media(
        &self,
        rows: Vec<FaceVerificationRow>,
    ) -> anyhow::Result<Vec<FaceVerificationWithMedia>> {
        let verifications = rows
            .into_iter()
            .map(FaceVerification::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let ids: Vec<Uuid> = verifications
            .iter()
            .flat_map(|v| std::iter::once(v.uploaded_image_id).chain(v.reference_image_id))
            .collect();
        let mut media = self.media_by_ids(&ids).await?;

        verifications
            .into_iter()
            .map(|v| {
                let uploaded = media
                    .remove(&v.uploaded_image_id)
                    .with_context(|| format!("verification {} lost its uploaded image", v.id))?;
                let reference = v.reference_image_id.and_then(|id| media.remove(&id));
                Ok(FaceVerificationWithMedia {
                    verification: v,
                    reference,
                    uploaded,
                })
            })
            .collect()
    }
}

async fn insert_media_tx(tx: &mut Transaction<'_, Postgres>, m: NewMedia) -> anyhow::Result<Media> {
    let query = format!(
        r#"
        INSERT INTO media (filename, url, mime_type, size)
        VALUES ($1, $2, $3, $4)
        RETURNING {MEDIA_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Media>(&query)
        .bind(&m.filename)
        .bind(&m.url)
        .bind(&m.mime_type)
        .bind(m.size)
        .fetch_one(&mut **tx)
        .await
        .context("insert media")
}

#[async_trait]
impl VerificationStore for PgVerificationStore {
    async fn create_with_media(
        &self,
        reference: Option<NewMedia>,
        uploaded: NewMedia,
        v: NewFaceVerification,
    ) -> anyhow::Result<FaceVerificationWithMedia> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        let reference = match reference {
            Some(m) => Some(insert_media_tx(&mut tx, m).await?),
            None => None,
        };
        let uploaded = insert_media_tx(&mut tx, uploaded).await?;

        let query = format!(
            r#"
            INSERT INTO face_verifications
                (reference_image_id, uploaded_image_id, image_type, result, confidence, duration)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {VERIFICATION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FaceVerificationRow>(&query)
            .bind(reference.as_ref().map(|m| m.id))
            .bind(uploaded.id)
            .bind(v.image_type.as_str())
            .bind(v.result.as_str())
            .bind(v.confidence)
            .bind(v.duration_ms)
            .fetch_one(&mut *tx)
            .await
            .context("insert face verification")?;

        tx.commit().await.context("commit tx")?;

        Ok(FaceVerificationWithMedia {
            verification: FaceVerification::try_from(row)?,
            reference,
            uploaded,
        })
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<FaceVerificationWithMedia>> {
        let query = format!("SELECT {VERIFICATION_COLUMNS} FROM face_verifications WHERE id = $1");
        let row = sqlx::query_as::<_, FaceVerificationRow>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find face verification")?;
        match row {
            Some(row) => Ok(self.attach_media(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_all(
        &self,
        filters: &VerificationFilters,
        skip: i64,
        take: i64,
    ) -> anyhow::Result<Page<FaceVerificationWithMedia>> {
        const WHERE: &str = "($1::text IS NULL OR image_type = $1) \
                             AND ($2::text IS NULL OR result = $2)";
        let image_type = filters.image_type.map(|t| t.as_str());
        let result = filters.result.map(|r| r.as_str());

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM face_verifications WHERE {WHERE}"
        ))
        .bind(image_type)
        .bind(result)
        .fetch_one(&self.db)
        .await
        .context("count face verifications")?;

        let query = format!(
            "SELECT {VERIFICATION_COLUMNS} FROM face_verifications WHERE {WHERE} \
             ORDER BY created_at DESC, id LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query_as::<_, FaceVerificationRow>(&query)
            .bind(image_type)
            .bind(result)
            .bind(take)
            .bind(skip)
            .fetch_all(&self.db)
            .await
            .context("list face verifications")?;

        Ok(Page {
            data: self.attach_media(rows).await?,
            pagination: PaginationMeta::new(skip, take, total),
        })
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<Option<FaceVerificationWithMedia>> {
        let Some(record) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        let mut tx = self.db.begin().await.context("begin tx")?;
        sqlx::query("DELETE FROM face_verifications WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("delete face verification")?;
        let media_ids: Vec<Uuid> = std::iter::once(record.uploaded.id)
            .chain(record.reference.as_ref().map(|m| m.id))
            .collect();
        sqlx::query("DELETE FROM media WHERE id = ANY($1)")
            .bind(&media_ids)
            .execute(&mut *tx)
            .await
            .context("delete media")?;
        tx.commit().await.context("commit tx")?;

        Ok(Some(record))
    }
}
