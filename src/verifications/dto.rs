use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::pagination::PageQuery;
use crate::verifications::repo_types::{ImageType, VerificationResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceVerificationDto {
    pub id: Uuid,
    /// Presigned GET URL; `null` when no reference image was supplied.
    pub reference_image_url: Option<String>,
    pub uploaded_image_url: String,
    pub image_type: ImageType,
    pub result: VerificationResult,
    pub confidence: Option<f64>,
    /// Seconds.
    pub duration: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListVerificationsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub image_type: Option<ImageType>,
    pub result: Option<VerificationResult>,
}

impl ListVerificationsQuery {
    pub fn page_query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            limit: self.limit,
        }
    }
}
