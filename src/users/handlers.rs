use axum::{extract::State, http::StatusCode};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        extractors::{require_self_or_admin, AuthSession, RequireAdmin},
        password,
        services::{is_strong_password, is_valid_email},
    },
    error::{AppError, AppResult},
    extract::{Json, Path, Query},
    response::ApiResponse,
    state::AppState,
    users::{
        dto::{ListUsersQuery, UpdateUserRequest, UserDto},
        repo::is_unique_violation,
        repo_types::{UserChanges, UserFilters, UserSort},
    },
};

#[instrument(skip(state, _admin))]
pub async fn list_users(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<ApiResponse<Vec<UserDto>>> {
    let sort = match query.sort.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            UserSort::parse(raw).ok_or_else(|| AppError::validation("Invalid sort parameter"))?
        }
        None => UserSort::default(),
    };
    let filters = UserFilters {
        search: query.search.clone(),
        sort,
    };
    let page = query.page_query();

    let users = state
        .users
        .find_all(&filters, page.skip(), page.limit())
        .await?
        .map(UserDto::from);

    Ok(ApiResponse::paginated(
        "Users fetched successfully",
        users.data,
        users.pagination,
    ))
}

#[instrument(skip(state, caller), fields(caller_id = %caller.0.user_id))]
pub async fn get_user(
    State(state): State<AppState>,
    caller: AuthSession,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<UserDto>> {
    require_self_or_admin(&caller.0, id)?;
    let user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(ApiResponse::ok("User fetched successfully", user.into()))
}

#[instrument(skip(state, caller, payload), fields(caller_id = %caller.0.user_id))]
pub async fn update_user(
    State(state): State<AppState>,
    caller: AuthSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<ApiResponse<UserDto>> {
    let AuthSession(caller) = caller;
    require_self_or_admin(&caller, id)?;

    // Self-service password changes go through PUT /auth/password, which
    // asks for the current password.
    let touches_credentials =
        payload.roles.is_some() || payload.is_active.is_some() || payload.password.is_some();
    if touches_credentials && !caller.is_admin() {
        warn!(user_id = %caller.user_id, target = %id, "non-admin tried to change roles, status or password");
        return Err(AppError::forbidden("Insufficient permissions"));
    }

    let email = payload.email.as_deref().map(|e| e.trim().to_lowercase());
    if let Some(email) = &email {
        if !is_valid_email(email) {
            return Err(AppError::validation("Invalid email"));
        }
    }
    let first_name = payload.first_name.as_deref().map(|s| s.trim().to_string());
    let last_name = payload.last_name.as_deref().map(|s| s.trim().to_string());
    if [&first_name, &last_name]
        .into_iter()
        .flatten()
        .any(|n| n.chars().count() < 2)
    {
        return Err(AppError::validation(
            "First and last name must be at least 2 characters",
        ));
    }

    let password_hash = match payload.password {
        Some(plain) => {
            if !is_strong_password(&plain) {
                return Err(AppError::validation(
                    "Password must be at least 8 characters and contain an uppercase letter and a digit",
                ));
            }
            Some(password::hash(plain).await?)
        }
        None => None,
    };

    if let Some(email) = &email {
        let taken = state
            .users
            .find_by_email(email)
            .await?
            .is_some_and(|other| other.id != id);
        if taken {
            return Err(AppError::Conflict("Email already in use".into()));
        }
    }

    let changes = UserChanges {
        email,
        first_name,
        last_name,
        password_hash,
        roles: payload.roles,
        is_active: payload.is_active,
    };
    let user = state
        .users
        .update(id, changes)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Email already in use".into())
            } else {
                AppError::Internal(e)
            }
        })?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    if touches_credentials {
        // Access tokens carry the old role set.
        let revoked = state.tokens.revoke_all_for_user(id).await?;
        info!(user_id = %id, revoked, "sessions revoked after credential change");
    }

    info!(user_id = %user.id, by = %caller.user_id, "user updated");
    Ok(ApiResponse::ok("User updated successfully", user.into()))
}

#[instrument(skip(state, admin), fields(caller_id = %admin.0.user_id))]
pub async fn delete_user(
    State(state): State<AppState>,
    admin: RequireAdmin,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if !state.users.delete(id).await? {
        return Err(AppError::not_found("User not found"));
    }
    let revoked = state.tokens.revoke_all_for_user(id).await?;
    info!(user_id = %id, revoked, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
