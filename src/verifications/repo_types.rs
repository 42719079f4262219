use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    #[default]
    Uploaded,
    Captured,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Uploaded => "uploaded",
            ImageType::Captured => "captured",
        }
    }
}

impl FromStr for ImageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(ImageType::Uploaded),
            "captured" => Ok(ImageType::Captured),
            other => anyhow::bail!("unknown image type: {other}"),
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a verification. `Pending` exists for stored data and filters;
/// the synchronous flow only ever writes `Success` or `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationResult {
    Pending,
    Success,
    Failure,
}

impl VerificationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationResult::Pending => "pending",
            VerificationResult::Success => "success",
            VerificationResult::Failure => "failure",
        }
    }
}

impl FromStr for VerificationResult {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VerificationResult::Pending),
            "success" => Ok(VerificationResult::Success),
            "failure" => Ok(VerificationResult::Failure),
            other => anyhow::bail!("unknown verification result: {other}"),
        }
    }
}

/// Stored object metadata. `url` holds the object key, not a public URL.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Media {
    pub id: Uuid,
    pub filename: String,
    pub url: String,
    pub mime_type: String,
    pub size: i64,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewMedia {
    pub filename: String,
    pub url: String,
    pub mime_type: String,
    pub size: i64,
}

#[derive(Debug, FromRow)]
pub struct FaceVerificationRow {
    pub id: Uuid,
    pub reference_image_id: Option<Uuid>,
    pub uploaded_image_id: Uuid,
    pub image_type: String,
    pub result: String,
    pub confidence: Option<f64>,
    pub duration: i64,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceVerification {
    pub id: Uuid,
    pub reference_image_id: Option<Uuid>,
    pub uploaded_image_id: Uuid,
    pub image_type: ImageType,
    pub result: VerificationResult,
    pub confidence: Option<f64>,
    pub duration_ms: i64,
    pub created_at: OffsetDateTime,
}

impl TryFrom<FaceVerificationRow> for FaceVerification {
    type Error = anyhow::Error;

    fn try_from(r: FaceVerificationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            reference_image_id: r.reference_image_id,
            uploaded_image_id: r.uploaded_image_id,
            image_type: r.image_type.parse()?,
            result: r.result.parse()?,
            confidence: r.confidence,
            duration_ms: r.duration,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewFaceVerification {
    pub image_type: ImageType,
    pub result: VerificationResult,
    pub confidence: Option<f64>,
    pub duration_ms: i64,
}

/// A verification with its media rows resolved.
#[derive(Debug, Clone)]
pub struct FaceVerificationWithMedia {
    pub verification: FaceVerification,
    pub reference: Option<Media>,
    pub uploaded: Media,
}

impl FaceVerificationWithMedia {
    /// Object keys backing this record.
    pub fn object_keys(&self) -> Vec<String> {
        std::iter::once(&self.uploaded)
            .chain(self.reference.as_ref())
            .map(|m| m.url.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerificationFilters {
    pub image_type: Option<ImageType>,
    pub result: Option<VerificationResult>,
}
