use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::reset::ResetCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "guide" => Some(Role::Guide),
            "lead-guide" => Some(Role::LeadGuide),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Full user row, credentials included. Never serialized directly.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: Role,
    pub password_hash: String,
    pub password_changed_at: Option<OffsetDateTime>,
    pub password_reset_hash: Option<String>,
    pub password_reset_expires: Option<OffsetDateTime>,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

const USER_COLUMNS: &str = "id, name, email, photo, role, password_hash, password_changed_at, \
     password_reset_hash, password_reset_expires, active, created_at";

impl User {
    /// Active user by (already normalized) email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND active = TRUE"
        ))
        .bind(email)
        .fetch_optional(db)
        .await
    }

    pub async fn find_active_by_id(db: &PgPool, id: Uuid) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND active = TRUE"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_reset_hash(db: &PgPool, hash: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE password_reset_hash = $1 AND active = TRUE"
        ))
        .bind(hash)
        .fetch_optional(db)
        .await
    }

    pub async fn create(
        db: &PgPool,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, password_hash) VALUES ($1, $2, $3) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(db)
        .await
    }

    /// Stores a new hash, stamps the change time and drops any pending reset code.
    pub async fn set_password(
        db: &PgPool,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET password_hash = $2, password_changed_at = $3, \
             password_reset_hash = NULL, password_reset_expires = NULL, version = version + 1 \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(password_hash)
        .bind(changed_at)
        .fetch_one(db)
        .await
    }

    /// Swaps in a new password only while `reset_hash` is still the user's
    /// unexpired reset code; the code is consumed by the same statement, so
    /// of two racing resets at most one gets a row back.
    pub async fn redeem_reset_code(
        db: &PgPool,
        id: Uuid,
        reset_hash: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET password_hash = $3, password_changed_at = $4, \
             password_reset_hash = NULL, password_reset_expires = NULL, version = version + 1 \
             WHERE id = $1 AND password_reset_hash = $2 AND password_reset_expires > $4 \
             AND active = TRUE RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(reset_hash)
        .bind(password_hash)
        .bind(now)
        .fetch_optional(db)
        .await
    }

    pub async fn set_reset_code(db: &PgPool, id: Uuid, code: &ResetCode) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE users SET password_reset_hash = $2, password_reset_expires = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(&code.hash)
        .bind(code.expires_at)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn clear_reset_code(db: &PgPool, id: Uuid) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE users SET password_reset_hash = NULL, password_reset_expires = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn update_profile(
        db: &PgPool,
        id: Uuid,
        name: Option<&str>,
        email: Option<&str>,
    ) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET name = COALESCE($2, name), email = COALESCE($3, email), \
             version = version + 1 WHERE id = $1 AND active = TRUE RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(email)
        .fetch_one(db)
        .await
    }

    pub async fn set_photo(db: &PgPool, id: Uuid, photo: &str) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET photo = $2, version = version + 1 \
             WHERE id = $1 AND active = TRUE RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(photo)
        .fetch_one(db)
        .await
    }

    /// Soft delete: the row stays, every default scope hides it.
    pub async fn deactivate(db: &PgPool, id: Uuid) -> sqlx::Result<()> {
        sqlx::query("UPDATE users SET active = FALSE, version = version + 1 WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
impl User {
    pub fn sample(role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "Sophie Louise Hart".into(),
            email: "sophie@example.io".into(),
            photo: "default.jpg".into(),
            role,
            password_hash: String::new(),
            password_changed_at: None,
            password_reset_hash: None,
            password_reset_expires: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
