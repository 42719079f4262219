use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::claims::TokenKind;
use crate::auth::repo_types::{NewToken, Token, TokenRow};

const TOKEN_COLUMNS: &str = "id, token, type, scopes, session_id, owned_by_id, device_name, \
                             device_ip, user_agent, browser_name, browser_version, os_name, \
                             os_version, device_type, device_vendor, device_model, location_city, \
                             location_country, location_lat, location_lon, created_at, updated_at, \
                             expires_at, unavailable_at";

/// Persistence for issued credentials. Revocation stamps `unavailable_at`;
/// only reset tokens are ever physically deleted.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn create(&self, token: NewToken) -> anyhow::Result<Token>;
    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<Token>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Token>>;
    async fn find_all_by_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Token>>;
    /// Most recent non-reset token per browser name, newest first.
    async fn latest_per_browser(&self, user_id: Uuid) -> anyhow::Result<Vec<Token>>;
    /// Returns `false` when the token was unknown or already revoked.
    async fn revoke(&self, id: Uuid) -> anyhow::Result<bool>;
    async fn revoke_session(&self, session_id: Uuid) -> anyhow::Result<u64>;
    async fn revoke_all_for_user(&self, user_id: Uuid) -> anyhow::Result<u64>;
    async fn delete_by_user_and_type(&self, user_id: Uuid, kind: TokenKind) -> anyhow::Result<u64>;
}

#[derive(Clone)]
pub struct PgTokenStore {
    db: PgPool,
}

impl PgTokenStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_tokens(rows: Vec<TokenRow>) -> anyhow::Result<Vec<Token>> {
    rows.into_iter().map(Token::try_from).collect()
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn create(&self, t: NewToken) -> anyhow::Result<Token> {
        let query = format!(
            r#"
            INSERT INTO tokens (
                token, type, scopes, session_id, owned_by_id, device_name, device_ip,
                user_agent, browser_name, browser_version, os_name, os_version, device_type,
                device_vendor, device_model, location_city, location_country, location_lat,
                location_lon, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20)
            RETURNING {TOKEN_COLUMNS}
            "#
        );
        let d = t.device;
        let row = sqlx::query_as::<_, TokenRow>(&query)
            .bind(&t.token)
            .bind(t.kind.as_str())
            .bind(&t.scopes)
            .bind(t.session_id)
            .bind(t.owned_by_id)
            .bind(d.device_name)
            .bind(d.device_ip)
            .bind(d.user_agent)
            .bind(d.browser_name)
            .bind(d.browser_version)
            .bind(d.os_name)
            .bind(d.os_version)
            .bind(d.device_type)
            .bind(d.device_vendor)
            .bind(d.device_model)
            .bind(d.location_city)
            .bind(d.location_country)
            .bind(d.location_lat)
            .bind(d.location_lon)
            .bind(t.expires_at)
            .fetch_one(&self.db)
            .await
            .context("insert token")?;
        Token::try_from(row)
    }

    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<Token>> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token = $1");
        let row = sqlx::query_as::<_, TokenRow>(&query)
            .bind(token)
            .fetch_optional(&self.db)
            .await
            .context("find token")?;
        row.map(Token::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Token>> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = $1");
        let row = sqlx::query_as::<_, TokenRow>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find token by id")?;
        row.map(Token::try_from).transpose()
    }

    async fn find_all_by_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Token>> {
        let query = format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE owned_by_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, TokenRow>(&query)
            .bind(user_id)
            .fetch_all(&self.db)
            .await
            .context("list user tokens")?;
        into_tokens(rows)
    }

    async fn latest_per_browser(&self, user_id: Uuid) -> anyhow::Result<Vec<Token>> {
        let query = format!(
            r#"
            SELECT * FROM (
                SELECT DISTINCT ON (browser_name) {TOKEN_COLUMNS}
                FROM tokens
                WHERE owned_by_id = $1 AND type <> $2
                ORDER BY browser_name, created_at DESC
            ) latest
            ORDER BY created_at DESC
            "#
        );
        let rows = sqlx::query_as::<_, TokenRow>(&query)
            .bind(user_id)
            .bind(TokenKind::ResetPassword.as_str())
            .fetch_all(&self.db)
            .await
            .context("list sessions")?;
        into_tokens(rows)
    }

    async fn revoke(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE tokens SET unavailable_at = now(), updated_at = now()
            WHERE id = $1 AND unavailable_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await
        .context("revoke token")?;
        Ok(res.rows_affected() > 0)
    }

    async fn revoke_session(&self, session_id: Uuid) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE tokens SET unavailable_at = now(), updated_at = now()
            WHERE session_id = $1 AND unavailable_at IS NULL
            "#,
        )
        .bind(session_id)
        .execute(&self.db)
        .await
        .context("revoke session")?;
        Ok(res.rows_affected())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE tokens SET unavailable_at = now(), updated_at = now()
            WHERE owned_by_id = $1 AND unavailable_at IS NULL
            "#,
        )
        .bind(user_id)
        .execute(&self.db)
        .await
        .context("revoke user tokens")?;
        Ok(res.rows_affected())
    }

    async fn delete_by_user_and_type(&self, user_id: Uuid, kind: TokenKind) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM tokens WHERE owned_by_id = $1 AND type = $2")
            .bind(user_id)
            .bind(kind.as_str())
            .execute(&self.db)
            .await
            .context("delete user tokens by type")?;
        Ok(res.rows_affected())
    }
}
