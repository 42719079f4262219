use std::marker::PhantomData;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::auth::claims::TokenKind;
use crate::auth::jwt::JwtKeys;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::users::repo_types::{Role, RoleSet};

const INVALID_TOKEN: &str = "Invalid or expired token";

/// Raw token from `Authorization: Bearer <token>`.
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::unauthorized("Invalid Authorization header"))?;

        Ok(BearerToken(token.to_string()))
    }
}

/// Caller identity decoded from a valid access JWT.
///
/// Checks signature, expiry, issuer, audience and token kind only. Use
/// [`AuthSession`] where a revoked token must be refused.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub roles: RoleSet,
    pub session_id: Uuid,
    pub token: String,
}

impl AuthUser {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let keys = JwtKeys::from_ref(state);

        let claims = keys.verify_access(&token).map_err(|e| {
            warn!(error = %e, "rejected access token");
            AppError::unauthorized(INVALID_TOKEN)
        })?;

        Ok(AuthUser {
            user_id: claims.sub,
            email: claims.email,
            roles: claims.roles,
            session_id: claims.sid,
            token,
        })
    }
}

/// [`AuthUser`] whose token is still stored and neither revoked nor expired.
#[derive(Debug, Clone)]
pub struct AuthSession(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;

        let stored = state.tokens.find_by_token(&user.token).await?;
        let live = stored.is_some_and(|t| {
            t.kind == TokenKind::Access
                && t.owned_by_id == user.user_id
                && t.is_usable(OffsetDateTime::now_utc())
        });
        if !live {
            warn!(user_id = %user.user_id, session_id = %user.session_id, "access token not live");
            return Err(AppError::unauthorized(INVALID_TOKEN));
        }
        Ok(AuthSession(user))
    }
}

/// A role a route insists on.
pub trait RequiredRole: Send + Sync + 'static {
    const ROLE: Role;
}

pub struct AdminRole;

impl RequiredRole for AdminRole {
    const ROLE: Role = Role::Admin;
}

/// Live session whose role set contains `R::ROLE`. No role implies another.
pub struct RequireRole<R: RequiredRole>(pub AuthUser, PhantomData<R>);

pub type RequireAdmin = RequireRole<AdminRole>;

#[async_trait]
impl<R: RequiredRole> FromRequestParts<AppState> for RequireRole<R> {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthSession(user) = AuthSession::from_request_parts(parts, state).await?;
        if !user.has_role(R::ROLE) {
            warn!(user_id = %user.user_id, required = %R::ROLE, "role check failed");
            return Err(AppError::forbidden("Insufficient permissions"));
        }
        Ok(RequireRole(user, PhantomData))
    }
}

/// Lets the caller act on `target` only if it is themselves or they are an admin.
pub fn require_self_or_admin(user: &AuthUser, target: Uuid) -> AppResult<()> {
    if user.user_id == target || user.is_admin() {
        Ok(())
    } else {
        Err(AppError::forbidden("Insufficient permissions"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    use crate::testing::{bearer, sample_admin, sample_user, seed_session, TestApp};

    fn parts_with(auth: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = auth {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn bearer_requires_the_scheme() {
        let mut parts = parts_with(None);
        assert!(BearerToken::from_request_parts(&mut parts, &()).await.is_err());

        let mut parts = parts_with(Some("Basic abc"));
        assert!(BearerToken::from_request_parts(&mut parts, &()).await.is_err());

        let mut parts = parts_with(Some("Bearer abc.def"));
        let BearerToken(t) = BearerToken::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(t, "abc.def");
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized_not_internal() {
        let app = TestApp::new();
        let mut parts = parts_with(Some("Bearer not.a.jwt"));
        let err = AuthUser::from_request_parts(&mut parts, &app.state)
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn revoked_token_fails_session_check_but_still_decodes() {
        let app = TestApp::new();
        let user = app.insert_user(sample_user("ada@example.com")).await;
        let pair = seed_session(&app.state, &user).await;

        let header = bearer(&pair.access.token);
        let mut parts = parts_with(Some(&header));
        assert!(AuthSession::from_request_parts(&mut parts, &app.state).await.is_ok());

        app.state.tokens.revoke_session(pair.session_id).await.unwrap();

        let mut parts = parts_with(Some(&header));
        assert!(AuthUser::from_request_parts(&mut parts, &app.state).await.is_ok());
        let mut parts = parts_with(Some(&header));
        let err = AuthSession::from_request_parts(&mut parts, &app.state)
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_gate_is_exact_membership() {
        let app = TestApp::new();
        let user = app.insert_user(sample_user("ada@example.com")).await;
        let admin = app.insert_user(sample_admin("root@example.com")).await;

        let pair = seed_session(&app.state, &user).await;
        let mut parts = parts_with(Some(&bearer(&pair.access.token)));
        let err = RequireAdmin::from_request_parts(&mut parts, &app.state)
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);

        let pair = seed_session(&app.state, &admin).await;
        let mut parts = parts_with(Some(&bearer(&pair.access.token)));
        assert!(RequireAdmin::from_request_parts(&mut parts, &app.state).await.is_ok());
    }

    #[test]
    fn self_or_admin() {
        let me = Uuid::new_v4();
        let caller = AuthUser {
            user_id: me,
            email: "ada@example.com".into(),
            roles: RoleSet::default(),
            session_id: Uuid::new_v4(),
            token: String::new(),
        };
        assert!(require_self_or_admin(&caller, me).is_ok());
        assert!(require_self_or_admin(&caller, Uuid::new_v4()).is_err());

        let admin = AuthUser {
            roles: RoleSet::single(Role::Admin),
            ..caller
        };
        assert!(require_self_or_admin(&admin, Uuid::new_v4()).is_ok());
    }
}
