// Stores own every database side effect; handlers only compose them.
pub mod notifications;
pub mod posts;
pub mod users;

pub use notifications::NotificationStore;
pub use posts::PostStore;
pub use users::UserStore;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::db::models::UserSummary;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Invalid credentials.")]
    InvalidCredentials,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Current time as stored in every `created_at`/`updated_at` column.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Columns selected by [`summary_from_row`], prefixed with a table alias.
pub(crate) fn summary_columns(alias: &str) -> String {
    format!(
        "{a}.id, {a}.name, {a}.username, {a}.profile_picture",
        a = alias
    )
}

/// Reads a [`UserSummary`] from four consecutive columns starting at `start`.
pub(crate) fn summary_from_row(row: &Row<'_>, start: usize) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: row.get(start)?,
        name: row.get(start + 1)?,
        username: row.get(start + 2)?,
        profile_picture: row.get(start + 3)?,
    })
}

pub(crate) fn user_id_for_username(conn: &Connection, username: &str) -> StoreResult<String> {
    conn.query_row(
        "SELECT id FROM users WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound("User not found".into()))
}

pub(crate) fn user_exists(conn: &Connection, id: &str) -> StoreResult<bool> {
    Ok(conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?)
}

/// Trims `value` and drops it when nothing is left.
pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::models::PublicUser;
    use crate::state::DbPool;
    use crate::store::users::Registration;

    pub fn register(pool: &DbPool, username: &str) -> PublicUser {
        UserStore::new(pool.clone())
            .register(&Registration {
                name: username.to_uppercase(),
                email: format!("{}@x.com", username),
                password: format!("{}-password", username),
                username: username.to_string(),
            })
            .unwrap()
    }

    /// File-backed pool, so several connections share one database.
    pub fn file_pool(dir: &tempfile::TempDir) -> DbPool {
        let pool = crate::db::create_pool(&dir.path().join("concurrent.db")).unwrap();
        crate::db::run_migrations(&pool).unwrap();
        pool
    }

    /// Runs `action` once per user on its own thread, all released together.
    pub fn run_together<F>(users: &[PublicUser], action: F) -> Vec<StoreResult<()>>
    where
        F: Fn(&PublicUser) -> StoreResult<()> + Sync,
    {
        let barrier = std::sync::Barrier::new(users.len());
        std::thread::scope(|scope| {
            let handles: Vec<_> = users
                .iter()
                .map(|user| {
                    let barrier = &barrier;
                    let action = &action;
                    scope.spawn(move || {
                        barrier.wait();
                        action(user)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }
}
