use std::net::IpAddr;
use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use lazy_static::lazy_static;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::claims::TokenKind;
use crate::auth::context::RequestContext;
use crate::auth::jwt::{JwtKeys, SignedToken};
use crate::auth::repo::TokenStore;
use crate::auth::repo_types::{DeviceInfo, NewToken, Token};
use crate::geo::GeoLocator;
use crate::users::repo_types::User;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// At least 8 characters with one uppercase letter and one digit.
pub(crate) fn is_strong_password(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

/// Access and refresh tokens issued together for one session.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub session_id: Uuid,
    pub access: Token,
    pub refresh: Token,
}

/// Issues, persists and revokes credentials.
#[derive(Clone)]
pub struct TokenService {
    keys: JwtKeys,
    store: Arc<dyn TokenStore>,
    geo: Arc<dyn GeoLocator>,
    reset_ttl: TimeDuration,
}

impl TokenService {
    pub fn new(
        keys: JwtKeys,
        store: Arc<dyn TokenStore>,
        geo: Arc<dyn GeoLocator>,
        reset_ttl_minutes: i64,
    ) -> Self {
        Self {
            keys,
            store,
            geo,
            reset_ttl: TimeDuration::minutes(reset_ttl_minutes),
        }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    async fn device_info(&self, ctx: &RequestContext) -> DeviceInfo {
        let location = match ctx.ip {
            Some(ip) => self.geo.locate(ip).await,
            None => None,
        };
        DeviceInfo::new(&ctx.user_agent, ctx.ip.map(|ip| ip.to_string()), location)
    }

    async fn persist(
        &self,
        signed: SignedToken,
        user: &User,
        session_id: Uuid,
        device: DeviceInfo,
    ) -> anyhow::Result<Token> {
        self.store
            .create(NewToken {
                token: signed.token,
                kind: signed.claims.kind,
                scopes: signed.claims.scopes,
                session_id: Some(session_id),
                owned_by_id: user.id,
                device,
                expires_at: signed.expires_at,
            })
            .await
    }

    async fn issue_pair(
        &self,
        user: &User,
        ctx: &RequestContext,
        session_id: Uuid,
        refresh_ttl: std::time::Duration,
    ) -> anyhow::Result<TokenPair> {
        let access = self
            .keys
            .sign(user, TokenKind::Access, session_id, self.keys.access_ttl)?;
        let refresh = self
            .keys
            .sign(user, TokenKind::Refresh, session_id, refresh_ttl)?;

        let device = self.device_info(ctx).await;
        let access = self.persist(access, user, session_id, device.clone()).await?;
        let refresh = self.persist(refresh, user, session_id, device).await?;

        debug!(user_id = %user.id, %session_id, "token pair issued");
        Ok(TokenPair {
            session_id,
            access,
            refresh,
        })
    }

    /// Opens a new session for `user`.
    pub async fn generate_tokens(
        &self,
        user: &User,
        ctx: &RequestContext,
        remember_me: bool,
    ) -> anyhow::Result<TokenPair> {
        let refresh_ttl = if remember_me {
            self.keys.remember_me_ttl
        } else {
            self.keys.refresh_ttl
        };
        self.issue_pair(user, ctx, Uuid::new_v4(), refresh_ttl)
            .await
    }

    /// Issues a fresh pair inside an existing session.
    pub async fn rotate_tokens(
        &self,
        user: &User,
        ctx: &RequestContext,
        session_id: Uuid,
    ) -> anyhow::Result<TokenPair> {
        self.issue_pair(user, ctx, session_id, self.keys.refresh_ttl)
            .await
    }

    /// True when none of the user's live sessions matches the caller's browser, OS and device type.
    pub async fn is_new_device(&self, user_id: Uuid, ctx: &RequestContext) -> anyhow::Result<bool> {
        let fingerprint = ctx.user_agent.fingerprint();
        let known = self
            .store
            .find_all_by_user(user_id)
            .await?
            .iter()
            .filter(|t| t.kind != TokenKind::ResetPassword && !t.is_revoked())
            .any(|t| t.device.fingerprint() == fingerprint);
        Ok(!known)
    }

    /// Replaces any outstanding reset token of the user with a fresh opaque one.
    pub async fn generate_password_reset_token(
        &self,
        user_id: Uuid,
        ip: Option<IpAddr>,
    ) -> anyhow::Result<Token> {
        let removed = self
            .store
            .delete_by_user_and_type(user_id, TokenKind::ResetPassword)
            .await?;
        if removed > 0 {
            debug!(%user_id, removed, "previous reset tokens removed");
        }

        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);

        let token = self
            .store
            .create(NewToken {
                token: Base64UrlUnpadded::encode_string(&bytes),
                kind: TokenKind::ResetPassword,
                scopes: TokenKind::ResetPassword.scopes(),
                session_id: None,
                owned_by_id: user_id,
                device: DeviceInfo {
                    device_ip: ip.map(|ip| ip.to_string()),
                    ..Default::default()
                },
                expires_at: OffsetDateTime::now_utc() + self.reset_ttl,
            })
            .await?;
        info!(%user_id, "password reset token issued");
        Ok(token)
    }

    pub async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<Token>> {
        self.store.find_by_token(token).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Token>> {
        self.store.find_by_id(id).await
    }

    pub async fn delete_token(&self, id: Uuid) -> anyhow::Result<bool> {
        self.store.revoke(id).await
    }

    pub async fn revoke_session(&self, session_id: Uuid) -> anyhow::Result<u64> {
        let revoked = self.store.revoke_session(session_id).await?;
        debug!(%session_id, revoked, "session revoked");
        Ok(revoked)
    }

    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> anyhow::Result<u64> {
        self.store.revoke_all_for_user(user_id).await
    }

    pub async fn sessions(&self, user_id: Uuid) -> anyhow::Result<Vec<Token>> {
        self.store.latest_per_browser(user_id).await
    }
}
