use std::time::Instant;

use anyhow::Context;
use bytes::Bytes;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::pagination::Page;
use crate::state::AppState;
use crate::verifications::dto::FaceVerificationDto;
use crate::verifications::repo_types::{
    FaceVerificationWithMedia, ImageType, NewFaceVerification, NewMedia, VerificationResult,
};

pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;
const KEY_PREFIX: &str = "face-verifications";

/// One file taken from the multipart body.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

pub struct NewVerificationUpload {
    pub uploaded: UploadItem,
    pub reference: Option<UploadItem>,
    pub image_type: ImageType,
}

pub(crate) fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tiff"),
        _ => None,
    }
}

pub(crate) fn is_allowed_mime(ct: &str) -> bool {
    ext_from_mime(ct).is_some()
}

struct StoredObject {
    key: String,
    media: NewMedia,
}

async fn put(st: &AppState, item: &UploadItem) -> anyhow::Result<StoredObject> {
    let ext = ext_from_mime(&item.content_type).unwrap_or("bin");
    let key = format!("{KEY_PREFIX}/{}.{ext}", Uuid::new_v4());
    st.storage
        .put_object(&key, item.body.clone(), &item.content_type)
        .await
        .with_context(|| format!("put_object {key}"))?;
    Ok(StoredObject {
        media: NewMedia {
            filename: key.clone(),
            url: key.clone(),
            mime_type: item.content_type.clone(),
            size: item.body.len() as i64,
        },
        key,
    })
}

/// Best-effort removal; failures are only logged.
async fn remove_objects(st: &AppState, keys: &[String]) {
    for key in keys {
        if let Err(e) = st.storage.delete_object(key).await {
            warn!(error = %e, %key, "object cleanup failed");
        }
    }
}

/// Stores the images, asks the recognizer about the uploaded one and records the outcome.
pub async fn create_verification(
    st: &AppState,
    upload: NewVerificationUpload,
) -> AppResult<FaceVerificationWithMedia> {
    let started = Instant::now();

    let uploaded = put(st, &upload.uploaded).await?;
    let reference = match &upload.reference {
        Some(item) => match put(st, item).await {
            Ok(obj) => Some(obj),
            Err(e) => {
                remove_objects(st, &[uploaded.key.clone()]).await;
                return Err(e.into());
            }
        },
        None => None,
    };
    let keys: Vec<String> = std::iter::once(uploaded.key.clone())
        .chain(reference.as_ref().map(|r| r.key.clone()))
        .collect();

    let outcome = match st
        .recognizer
        .recognize(
            upload.uploaded.body.clone(),
            &uploaded.key,
            &upload.uploaded.content_type,
        )
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "face recognition failed");
            remove_objects(st, &keys).await;
            return Err(AppError::BadGateway("Face recognition failed".into()));
        }
    };

    let result = if outcome.is_same {
        VerificationResult::Success
    } else {
        VerificationResult::Failure
    };

    let record = st
        .verifications
        .create_with_media(
            reference.map(|r| r.media),
            uploaded.media,
            NewFaceVerification {
                image_type: upload.image_type,
                result,
                confidence: Some(outcome.confidence),
                duration_ms: started.elapsed().as_millis() as i64,
            },
        )
        .await;

    match record {
        Ok(record) => {
            info!(
                verification_id = %record.verification.id,
                result = result.as_str(),
                confidence = outcome.confidence,
                "face verification recorded"
            );
            Ok(record)
        }
        Err(e) => {
            remove_objects(st, &keys).await;
            Err(e.into())
        }
    }
}

pub async fn to_dto(st: &AppState, record: FaceVerificationWithMedia) -> anyhow::Result<FaceVerificationDto> {
    let ttl = st.config.storage.presign_ttl_secs;
    let uploaded_image_url = st.storage.presign_get(&record.uploaded.url, ttl).await?;
    let reference_image_url = match &record.reference {
        Some(m) => Some(st.storage.presign_get(&m.url, ttl).await?),
        None => None,
    };
    let v = record.verification;
    Ok(FaceVerificationDto {
        id: v.id,
        reference_image_url,
        uploaded_image_url,
        image_type: v.image_type,
        result: v.result,
        confidence: v.confidence,
        duration: v.duration_ms as f64 / 1000.0,
        created_at: v.created_at,
    })
}

pub async fn to_dto_page(
    st: &AppState,
    page: Page<FaceVerificationWithMedia>,
) -> anyhow::Result<Page<FaceVerificationDto>> {
    let mut data = Vec::with_capacity(page.data.len());
    for record in page.data {
        data.push(to_dto(st, record).await?);
    }
    Ok(Page {
        data,
        pagination: page.pagination,
    })
}

/// Removes the record, its media rows and, best-effort, the stored objects.
pub async fn delete_verification(st: &AppState, id: Uuid) -> AppResult<()> {
    let removed = st
        .verifications
        .delete(id)
        .await?
        .ok_or_else(|| AppError::not_found("Face verification not found"))?;
    remove_objects(st, &removed.object_keys()).await;
    info!(verification_id = %id, "face verification deleted");
    Ok(())
}
