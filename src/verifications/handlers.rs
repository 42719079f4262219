use axum::{extract::State, http::StatusCode};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    auth::extractors::{AuthSession, RequireAdmin},
    error::{AppError, AppResult},
    extract::{Multipart, Path, Query},
    response::ApiResponse,
    state::AppState,
    verifications::{
        dto::{FaceVerificationDto, ListVerificationsQuery},
        repo_types::{ImageType, VerificationFilters},
        services::{
            create_verification, delete_verification, is_allowed_mime, to_dto, to_dto_page,
            NewVerificationUpload, UploadItem, MAX_FILE_BYTES,
        },
    },
};

fn bad_multipart(e: impl std::fmt::Display) -> AppError {
    AppError::validation(format!("Invalid multipart body: {e}"))
}

async fn read_image(field: axum::extract::multipart::Field<'_>) -> AppResult<UploadItem> {
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    if !is_allowed_mime(&content_type) {
        warn!(%content_type, "rejected upload type");
        return Err(AppError::validation(
            "Unsupported file type. Accepted formats: JPEG, PNG, WEBP, GIF, BMP, TIFF",
        ));
    }
    let body = field.bytes().await.map_err(bad_multipart)?;
    if body.len() > MAX_FILE_BYTES {
        return Err(AppError::validation("File too large (max 10 MiB)"));
    }
    Ok(UploadItem { body, content_type })
}

/// POST /face-verifications (multipart)
/// Fields: uploadedImage (required), referenceImage, imageType
#[instrument(skip(state, caller, mp), fields(user_id = %caller.0.user_id))]
pub async fn create(
    State(state): State<AppState>,
    caller: AuthSession,
    Multipart(mut mp): Multipart,
) -> AppResult<ApiResponse<FaceVerificationDto>> {
    let mut uploaded = None;
    let mut reference = None;
    let mut image_type = ImageType::default();

    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("uploadedImage") => uploaded = Some(read_image(field).await?),
            Some("referenceImage") => reference = Some(read_image(field).await?),
            Some("imageType") => {
                let raw = field.text().await.map_err(bad_multipart)?;
                image_type = raw
                    .trim()
                    .parse()
                    .map_err(|_| AppError::validation("imageType must be uploaded or captured"))?;
            }
            _ => {}
        }
    }

    let uploaded = uploaded.ok_or_else(|| AppError::validation("uploadedImage is required"))?;

    let record = create_verification(
        &state,
        NewVerificationUpload {
            uploaded,
            reference,
            image_type,
        },
    )
    .await?;
    let dto = to_dto(&state, record).await?;

    Ok(ApiResponse::created("Face verification created", dto))
}

#[instrument(skip(state, _admin))]
pub async fn list(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Query(query): Query<ListVerificationsQuery>,
) -> AppResult<ApiResponse<Vec<FaceVerificationDto>>> {
    let filters = VerificationFilters {
        image_type: query.image_type,
        result: query.result,
    };
    let page = query.page_query();
    let records = state
        .verifications
        .find_all(&filters, page.skip(), page.limit())
        .await?;
    let page = to_dto_page(&state, records).await?;

    Ok(ApiResponse::paginated(
        "Face verifications fetched successfully",
        page.data,
        page.pagination,
    ))
}

#[instrument(skip(state, _caller))]
pub async fn get_one(
    State(state): State<AppState>,
    _caller: AuthSession,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<FaceVerificationDto>> {
    let record = state
        .verifications
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("Face verification not found"))?;
    let dto = to_dto(&state, record).await?;
    Ok(ApiResponse::ok("Face verification fetched successfully", dto))
}

#[instrument(skip(state, _admin))]
pub async fn delete(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    delete_verification(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::testing::{sample_admin, sample_user, seed_session, FakeRecognizer, MultipartBody, TestApp};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

    #[tokio::test]
    async fn upload_requires_a_session() {
        let app = TestApp::new();
        let body = MultipartBody::new().file("uploadedImage", "me.png", "image/png", PNG);
        let (status, _) = app.multipart("/api/face-verifications", body, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn upload_then_fetch() {
        let app = TestApp::new();
        let user = app.insert_user(sample_user("ada@example.com")).await;
        let token = seed_session(&app.state, &user).await.access.token;

        let body = MultipartBody::new()
            .file("uploadedImage", "me.png", "image/png", PNG)
            .file("referenceImage", "ref.jpg", "image/jpeg", b"jpeg")
            .text("imageType", "captured");
        let (status, body) = app
            .multipart("/api/face-verifications", body, Some(&token))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["result"], "success");
        assert_eq!(body["data"]["imageType"], "captured");
        assert!(body["data"]["referenceImageUrl"].is_string());

        let id = body["data"]["id"].as_str().unwrap().to_string();
        let (status, body) = app
            .call(Method::GET, &format!("/api/face-verifications/{id}"), None, Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], id);
    }

    #[tokio::test]
    async fn missing_or_unsupported_image_is_rejected() {
        let app = TestApp::new();
        let user = app.insert_user(sample_user("ada@example.com")).await;
        let token = seed_session(&app.state, &user).await.access.token;

        let body = MultipartBody::new().text("imageType", "uploaded");
        let (status, body) = app
            .multipart("/api/face-verifications", body, Some(&token))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "uploadedImage is required");

        let body = MultipartBody::new().file("uploadedImage", "doc.pdf", "application/pdf", b"%PDF");
        let (status, _) = app
            .multipart("/api/face-verifications", body, Some(&token))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let body = MultipartBody::new()
            .file("uploadedImage", "me.png", "image/png", PNG)
            .text("imageType", "painted");
        let (status, _) = app
            .multipart("/api/face-verifications", body, Some(&token))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(app.storage.keys().is_empty());
    }

    #[tokio::test]
    async fn non_multipart_body_and_bad_id_are_validation_errors() {
        let app = TestApp::new();
        let user = app.insert_user(sample_user("ada@example.com")).await;
        let token = seed_session(&app.state, &user).await.access.token;

        let (status, body) = app
            .call(
                Method::POST,
                "/api/face-verifications",
                Some(serde_json::json!({ "uploadedImage": "me.png" })),
                Some(&token),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (status, body) = app
            .call(Method::GET, "/api/face-verifications/42", None, Some(&token))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(app.recognizer.calls().is_empty());
    }

    #[tokio::test]
    async fn recognizer_failure_is_bad_gateway() {
        let app = TestApp::with_recognizer(FakeRecognizer::failing());
        let user = app.insert_user(sample_user("ada@example.com")).await;
        let token = seed_session(&app.state, &user).await.access.token;

        let body = MultipartBody::new().file("uploadedImage", "me.png", "image/png", PNG);
        let (status, body) = app
            .multipart("/api/face-verifications", body, Some(&token))
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["message"], "Face recognition failed");
        assert!(app.storage.keys().is_empty());
    }

    #[tokio::test]
    async fn listing_and_deleting_are_admin_only() {
        let app = TestApp::new();
        let user = app.insert_user(sample_user("ada@example.com")).await;
        let admin = app.insert_user(sample_admin("root@example.com")).await;
        let user_token = seed_session(&app.state, &user).await.access.token;
        let admin_token = seed_session(&app.state, &admin).await.access.token;

        for image_type in ["uploaded", "captured", "captured"] {
            let body = MultipartBody::new()
                .file("uploadedImage", "me.png", "image/png", PNG)
                .text("imageType", image_type);
            let (status, _) = app
                .multipart("/api/face-verifications", body, Some(&user_token))
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, _) = app
            .call(Method::GET, "/api/face-verifications", None, Some(&user_token))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .call(
                Method::GET,
                "/api/face-verifications?imageType=captured&limit=1",
                None,
                Some(&admin_token),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["pagination"]["totalItems"], 2);
        assert_eq!(body["pagination"]["nextPage"], 2);

        let id = body["data"][0]["id"].as_str().unwrap().to_string();
        let uri = format!("/api/face-verifications/{id}");
        let (status, _) = app.call(Method::DELETE, &uri, None, Some(&user_token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.call(Method::DELETE, &uri, None, Some(&admin_token)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.call(Method::GET, &uri, None, Some(&admin_token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(app.storage.keys().len(), 2);
    }
}
