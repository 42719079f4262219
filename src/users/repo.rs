use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::pagination::{Page, PaginationMeta};
use crate::users::repo_types::{NewUser, RoleSet, User, UserChanges, UserFilters, UserRow};

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, roles, is_active, \
                            last_login_at, created_at, updated_at, deleted_at";

/// Persistence for user records. Every read skips soft-deleted rows; absence is `Ok(None)`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn create(&self, user: NewUser) -> anyhow::Result<User>;
    async fn update(&self, id: Uuid, changes: UserChanges) -> anyhow::Result<Option<User>>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()>;
    async fn touch_last_login(&self, id: Uuid) -> anyhow::Result<()>;
    /// Soft delete. Returns `false` when no live user had that id.
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
    async fn find_all(
        &self,
        filters: &UserFilters,
        skip: i64,
        take: i64,
    ) -> anyhow::Result<Page<User>>;
}

/// True when the error chain holds a Postgres unique violation (SQLSTATE 23505).
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<sqlx::Error>())
        .any(|e| match e {
            sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
            _ => false,
        })
}

/// Escapes `%`, `_` and `\` and wraps the term for a substring `ILIKE`.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1) AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find user by email")?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        row.map(User::try_from).transpose()
    }

    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let query = format!(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name, roles)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(RoleSet::default().to_strings())
            .fetch_one(&self.db)
            .await
            .context("insert user")?;
        User::try_from(row)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> anyhow::Result<Option<User>> {
        let query = format!(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                password_hash = COALESCE($5, password_hash),
                roles = COALESCE($6, roles),
                is_active = COALESCE($7, is_active),
                updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(id)
            .bind(changes.email)
            .bind(changes.first_name)
            .bind(changes.last_name)
            .bind(changes.password_hash)
            .bind(changes.roles.map(|r| r.to_strings()))
            .bind(changes.is_active)
            .fetch_optional(&self.db)
            .await
            .context("update user")?;
        row.map(User::try_from).transpose()
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET password_hash = $2, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await
        .context("update user password")?;
        Ok(())
    }

    async fn touch_last_login(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET last_login_at = now() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(&self.db)
            .await
            .context("touch last login")?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users SET deleted_at = now(), is_active = FALSE, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await
        .context("soft delete user")?;
        Ok(res.rows_affected() > 0)
    }

    async fn find_all(
        &self,
        filters: &UserFilters,
        skip: i64,
        take: i64,
    ) -> anyhow::Result<Page<User>> {
        let pattern = filters
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        const WHERE: &str = "deleted_at IS NULL AND ($1::text IS NULL \
                             OR first_name ILIKE $1 OR last_name ILIKE $1 OR email ILIKE $1)";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users WHERE {WHERE}"))
            .bind(pattern.as_deref())
            .fetch_one(&self.db)
            .await
            .context("count users")?;

        // Sort column comes from a closed enum, never from raw input.
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {WHERE} \
             ORDER BY {col} {dir} NULLS LAST, id \
             LIMIT $2 OFFSET $3",
            col = filters.sort.field.column(),
            dir = if filters.sort.descending { "DESC" } else { "ASC" },
        );
        let rows = sqlx::query_as::<_, UserRow>(&query)
            .bind(pattern.as_deref())
            .bind(take)
            .bind(skip)
            .fetch_all(&self.db)
            .await
            .context("list users")?;

        let data = rows
            .into_iter()
            .map(User::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Page {
            data,
            pagination: PaginationMeta::new(skip, take, total),
        })
    }
}
