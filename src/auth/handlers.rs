use axum::extract::State;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        claims::TokenKind,
        context::RequestContext,
        dto::{
            AuthResponse, LoginRequest, RegisterRequest, RequestPasswordResetRequest,
            ResetPasswordRequest, ResetTokenResponse, SessionDto, SessionsQuery, TokenRequest,
            UpdatePasswordRequest,
        },
        extractors::{require_self_or_admin, AuthSession},
        password,
        repo_types::DeviceInfo,
        services::{is_strong_password, is_valid_email},
    },
    error::{AppError, AppResult},
    extract::{Json, Path, Query},
    geo::Location,
    notify::{dispatch, Notification, NotificationKind},
    response::ApiResponse,
    state::AppState,
    users::{
        dto::UserDto,
        repo::is_unique_violation,
        repo_types::{NewUser, User},
    },
};

const INVALID_CREDENTIALS: &str = "Invalid credentials";
const WEAK_PASSWORD: &str =
    "Password must be at least 8 characters and contain an uppercase letter and a digit";

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_new_password(new_password: &str, confirm: &str) -> AppResult<()> {
    if new_password != confirm {
        return Err(AppError::validation("Passwords do not match"));
    }
    if !is_strong_password(new_password) {
        return Err(AppError::validation(WEAK_PASSWORD));
    }
    Ok(())
}

fn notify(
    state: &AppState,
    kind: NotificationKind,
    user: &User,
    ctx: &RequestContext,
    device: Option<&DeviceInfo>,
) {
    let location = device.and_then(|d| {
        Location {
            city: d.location_city.clone(),
            country: d.location_country.clone(),
            ..Default::default()
        }
        .describe()
    });
    dispatch(
        state.notifier.clone(),
        Notification {
            kind,
            recipient: user.email.clone(),
            name: user.first_name.clone(),
            device: ctx.user_agent.describe(),
            ip: ctx.ip,
            location,
            at: OffsetDateTime::now_utc(),
        },
    );
}

#[instrument(skip(state, ctx, payload))]
pub async fn register(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let email = normalize_email(&payload.email);
    let first_name = payload.first_name.trim().to_string();
    let last_name = payload.last_name.trim().to_string();

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::validation("Invalid email"));
    }
    if first_name.chars().count() < 2 || last_name.chars().count() < 2 {
        return Err(AppError::validation(
            "First and last name must be at least 2 characters",
        ));
    }
    check_new_password(&payload.password, &payload.confirm_password)?;

    if state.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("User already exists".into()));
    }

    let password_hash = password::hash(payload.password).await?;
    let user = state
        .users
        .create(NewUser {
            email,
            password_hash,
            first_name,
            last_name,
        })
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("User already exists".into())
            } else {
                AppError::Internal(e)
            }
        })?;

    let pair = state.tokens.generate_tokens(&user, &ctx, false).await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(ApiResponse::created("User registered successfully", pair.into()))
}

#[instrument(skip(state, ctx, payload))]
pub async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<LoginRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let email = normalize_email(&payload.email);

    let Some(user) = state.users.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    };

    // Both answers are needed before deciding, so a failed attempt from an
    // unknown device can be reported.
    let (valid, new_device) = tokio::join!(
        password::verify(payload.password, user.password_hash.clone()),
        state.tokens.is_new_device(user.id, &ctx),
    );
    let (valid, new_device) = (valid?, new_device?);

    if !valid {
        warn!(user_id = %user.id, new_device, "login invalid password");
        if new_device {
            notify(&state, NotificationKind::FailedLoginAttempt, &user, &ctx, None);
        }
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    }
    if !user.is_active {
        warn!(user_id = %user.id, "login on inactive account");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    }

    state.users.touch_last_login(user.id).await?;
    let pair = state
        .tokens
        .generate_tokens(&user, &ctx, payload.remember_me)
        .await?;

    if new_device {
        notify(
            &state,
            NotificationKind::NewDeviceLogin,
            &user,
            &ctx,
            Some(&pair.access.device),
        );
    }

    info!(user_id = %user.id, session_id = %pair.session_id, new_device, "user logged in");
    Ok(ApiResponse::ok("Login successful", pair.into()))
}

#[instrument(skip(state, ctx, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<TokenRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let claims = state
        .tokens
        .keys()
        .verify_refresh(&payload.token)
        .map_err(|e| {
            warn!(error = %e, "refresh rejected");
            AppError::unauthorized("Invalid token")
        })?;

    let stored = state
        .tokens
        .find_by_token(&payload.token)
        .await?
        .filter(|t| {
            t.kind == TokenKind::Refresh
                && t.owned_by_id == claims.sub
                && t.is_usable(OffsetDateTime::now_utc())
        })
        .ok_or_else(|| {
            warn!(user_id = %claims.sub, "refresh token not live");
            AppError::unauthorized("Invalid token")
        })?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    if !user.is_active {
        return Err(AppError::unauthorized("Invalid token"));
    }

    // Retire the presented refresh token and every access token issued with it.
    state.tokens.delete_token(stored.id).await?;
    state.tokens.revoke_session(claims.sid).await?;
    let pair = state.tokens.rotate_tokens(&user, &ctx, claims.sid).await?;

    info!(user_id = %user.id, session_id = %pair.session_id, "tokens refreshed");
    Ok(ApiResponse::ok("Token refreshed successfully", pair.into()))
}

#[instrument(skip(state, ctx, payload))]
pub async fn request_password_reset(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<RequestPasswordResetRequest>,
) -> AppResult<ApiResponse<ResetTokenResponse>> {
    let email = normalize_email(&payload.email);
    let Some(user) = state.users.find_by_email(&email).await? else {
        warn!(email = %email, "reset requested for unknown email");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    };

    let token = state
        .tokens
        .generate_password_reset_token(user.id, ctx.ip)
        .await?;
    notify(&state, NotificationKind::PasswordResetRequested, &user, &ctx, None);

    Ok(ApiResponse::ok(
        "Password reset requested",
        ResetTokenResponse { token: token.token },
    ))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<ApiResponse<()>> {
    let stored = state
        .tokens
        .find_by_token(&payload.token)
        .await?
        .filter(|t| {
            t.kind == TokenKind::ResetPassword && t.is_usable(OffsetDateTime::now_utc())
        })
        .ok_or_else(|| AppError::validation("Invalid or expired token"))?;

    let user = state
        .users
        .find_by_id(stored.owned_by_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    let current_ok =
        password::verify(payload.current_password, user.password_hash.clone()).await?;
    if !current_ok {
        warn!(user_id = %user.id, "reset with wrong current password");
        return Err(AppError::validation("Current password is incorrect"));
    }
    check_new_password(&payload.new_password, &payload.confirm_password)?;

    let hash = password::hash(payload.new_password).await?;
    state.users.update_password(user.id, &hash).await?;
    state.tokens.delete_token(stored.id).await?;

    info!(user_id = %user.id, "password reset");
    Ok(ApiResponse::ok("Password reset successfully", ()))
}

#[instrument(skip(state, caller, payload), fields(user_id = %caller.0.user_id))]
pub async fn update_password(
    State(state): State<AppState>,
    caller: AuthSession,
    Json(payload): Json<UpdatePasswordRequest>,
) -> AppResult<ApiResponse<()>> {
    let AuthSession(caller) = caller;
    let user = state
        .users
        .find_by_id(caller.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    if !password::verify(payload.current_password, user.password_hash.clone()).await? {
        warn!(user_id = %user.id, "password change with wrong current password");
        return Err(AppError::unauthorized("Invalid password"));
    }
    check_new_password(&payload.new_password, &payload.confirm_password)?;

    let hash = password::hash(payload.new_password).await?;
    state.users.update_password(user.id, &hash).await?;

    info!(user_id = %user.id, "password updated");
    Ok(ApiResponse::ok("Password updated successfully", ()))
}

#[instrument(skip(state, caller), fields(user_id = %caller.0.user_id))]
pub async fn me(
    State(state): State<AppState>,
    caller: AuthSession,
) -> AppResult<ApiResponse<UserDto>> {
    let AuthSession(caller) = caller;
    let mut user = state
        .users
        .find_by_id(caller.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    state.users.touch_last_login(user.id).await?;
    user.last_login_at = Some(OffsetDateTime::now_utc());

    Ok(ApiResponse::ok("User retrieved successfully", user.into()))
}

#[instrument(skip(state, caller, query), fields(user_id = %caller.0.user_id))]
pub async fn sessions(
    State(state): State<AppState>,
    caller: AuthSession,
    Query(query): Query<SessionsQuery>,
) -> AppResult<ApiResponse<Vec<SessionDto>>> {
    let AuthSession(caller) = caller;
    let target = query.user_id.unwrap_or(caller.user_id);
    require_self_or_admin(&caller, target)?;

    let sessions = state
        .tokens
        .sessions(target)
        .await?
        .into_iter()
        .map(|t| SessionDto::from_token(t, Some(caller.session_id)))
        .collect();

    Ok(ApiResponse::ok("Sessions retrieved successfully", sessions))
}

#[instrument(skip(state, caller), fields(user_id = %caller.0.user_id))]
pub async fn logout(
    State(state): State<AppState>,
    caller: AuthSession,
) -> AppResult<ApiResponse<()>> {
    let AuthSession(caller) = caller;
    let revoked = state.tokens.revoke_session(caller.session_id).await?;
    info!(user_id = %caller.user_id, session_id = %caller.session_id, revoked, "logged out");
    Ok(ApiResponse::ok("Logged out successfully", ()))
}

#[instrument(skip(state, caller), fields(user_id = %caller.0.user_id))]
pub async fn revoke_session(
    State(state): State<AppState>,
    caller: AuthSession,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<()>> {
    let AuthSession(caller) = caller;
    let token = state
        .tokens
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("Session not found"))?;
    require_self_or_admin(&caller, token.owned_by_id)?;

    match token.session_id {
        Some(session_id) => {
            state.tokens.revoke_session(session_id).await?;
        }
        None => {
            state.tokens.delete_token(token.id).await?;
        }
    }

    info!(token_id = %id, owner = %token.owned_by_id, "session revoked");
    Ok(ApiResponse::ok("Session revoked successfully", ()))
}
