use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::claims::TokenKind;
use crate::auth::repo_types::{DeviceInfo, Token};
use crate::auth::services::TokenPair;

/// Request body for user registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub first_name: String,
    pub last_name: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// Request body carrying a single token (refresh).
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct RequestPasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsQuery {
    pub user_id: Option<Uuid>,
}

/// Returned after register, login or refresh.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<TokenPair> for AuthResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access.token,
            refresh_token: pair.refresh.token,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResetTokenResponse {
    pub token: String,
}

/// One entry of the sessions list. The token value itself is never echoed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDto {
    pub id: Uuid,
    pub session_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub scopes: Vec<String>,
    #[serde(flatten)]
    pub device: DeviceInfo,
    pub current: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub unavailable_at: Option<OffsetDateTime>,
}

impl SessionDto {
    pub fn from_token(token: Token, current_session: Option<Uuid>) -> Self {
        Self {
            id: token.id,
            current: token.session_id.is_some() && token.session_id == current_session,
            session_id: token.session_id,
            kind: token.kind,
            scopes: token.scopes,
            device: token.device,
            created_at: token.created_at,
            updated_at: token.updated_at,
            expires_at: token.expires_at,
            unavailable_at: token.unavailable_at,
        }
    }
}
