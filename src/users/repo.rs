use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::repo_types::{ListQuery, NewUserRecord, ProfilePatch, UserRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email '{email}' is already registered")]
    Conflict { email: String },

    #[error("user not found")]
    NotFound,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence port for user records.
///
/// Emails are compared lower-cased. Records returned here still carry the
/// credential hash; callers convert to `PublicUser` before anything leaves
/// the service layer.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;
    /// Fails with `Conflict` when the email is taken.
    async fn create(&self, new: NewUserRecord) -> Result<UserRecord, StoreError>;
    /// Replaces the hash and clears `must_change_password` in one write.
    async fn complete_password_rotation(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError>;
    async fn update_profile(&self, id: Uuid, patch: ProfilePatch)
        -> Result<UserRecord, StoreError>;
    async fn touch_last_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
    /// Newest first. Returns the page and the total number of matches.
    async fn list(&self, query: &ListQuery) -> Result<(Vec<UserRecord>, u64), StoreError>;
}

const USER_COLUMNS: &str =
    "id, email, name, password_hash, must_change_password, created_at, updated_at, last_login";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_write_error(e: sqlx::Error, email: &str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict {
            email: email.to_string(),
        },
        _ => StoreError::Backend(anyhow::Error::new(e).context("write user")),
    }
}

/// `ILIKE` pattern matching `term` anywhere, with wildcards escaped.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email.trim())
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, new: NewUserRecord) -> Result<UserRecord, StoreError> {
        let email = new.email.trim().to_lowercase();
        let user = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            INSERT INTO users (email, name, password_hash, must_change_password)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&email)
        .bind(&new.name)
        .bind(&new.password_hash)
        .bind(new.must_change_password)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_write_error(e, &email))?;
        Ok(user)
    }

    async fn complete_password_rotation(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2, must_change_password = FALSE, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await
        .context("rotate password")?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        patch: ProfilePatch,
    ) -> Result<UserRecord, StoreError> {
        let email = patch.email.map(|e| e.trim().to_lowercase());
        let user = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            UPDATE users
               SET name = COALESCE($2, name),
                   email = COALESCE($3, email),
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.name)
        .bind(email.as_deref())
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_write_error(e, email.as_deref().unwrap_or_default()))?;
        user.ok_or(StoreError::NotFound)
    }

    async fn touch_last_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await
            .context("touch last login")?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let done = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, query: &ListQuery) -> Result<(Vec<UserRecord>, u64), StoreError> {
        let pattern = query.search.as_deref().map(like_pattern);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
              FROM users
             WHERE $1::text IS NULL OR name ILIKE $1 OR email ILIKE $1
            "#,
        )
        .bind(pattern.as_deref())
        .fetch_one(&self.db)
        .await
        .context("count users")?;

        let rows = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            SELECT {USER_COLUMNS}
              FROM users
             WHERE $1::text IS NULL OR name ILIKE $1 OR email ILIKE $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3
            "#
        ))
        .bind(pattern.as_deref())
        .bind(i64::from(query.page_size))
        .bind(query.offset() as i64)
        .fetch_all(&self.db)
        .await
        .context("list users")?;

        Ok((rows, total.max(0) as u64))
    }
}
