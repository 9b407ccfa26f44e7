use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;

use crate::auth::password;
use crate::db::models::{NotificationKind, PublicUser, UserRecord, UserSummary};
use crate::state::DbPool;
use crate::store::{
    new_id, non_blank, notifications, now, summary_columns, summary_from_row, user_exists,
    user_id_for_username, StoreError, StoreResult,
};

const USER_COLUMNS: &str = "id, name, username, email, password_hash, profile_picture, \
                            bio, location, website, created_at, updated_at";

/// Usernames that collide with static segments of `/users/profile/{username}`.
const RESERVED_USERNAMES: &[&str] = &["profile"];

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub username: String,
}

/// Partial profile update. Absent or blank fields leave the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    /// Already resolved to a URL.
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowState {
    Followed,
    Unfollowed,
}

/// Identity, credentials, profile attributes and follow edges.
#[derive(Clone)]
pub struct UserStore {
    pool: DbPool,
}

impl UserStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create an account. The password is stored only as a bcrypt hash.
    pub fn register(&self, input: &Registration) -> StoreResult<PublicUser> {
        let name = input.name.trim();
        let email = input.email.trim();
        let username = input.username.trim();
        if name.is_empty() || email.is_empty() || username.is_empty() || input.password.is_empty()
        {
            return Err(StoreError::Invalid("All fields are mandatory.".into()));
        }
        check_not_reserved(username)?;

        let conn = self.pool.get()?;
        if taken(&conn, "email", email, None)? {
            return Err(StoreError::Conflict("User already exists.".into()));
        }
        if taken(&conn, "username", username, None)? {
            return Err(StoreError::Conflict("Username already taken".into()));
        }

        let hash = password::hash_password(&input.password)?;
        let id = new_id();
        let ts = now();
        conn.execute(
            "INSERT INTO users (id, name, username, email, password_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![id, name, username, email, hash, ts],
        )
        .map_err(|e| unique_violation_as_conflict(e, "User already exists."))?;

        tracing::info!("Registered user {} ({})", username, id);
        load_public(&conn, "id", &id)?
            .ok_or_else(|| StoreError::NotFound("User not found".into()))
    }

    /// Check an email/password pair. Unknown email and wrong password yield
    /// the same error.
    pub fn authenticate(&self, email: &str, plaintext: &str) -> StoreResult<PublicUser> {
        let conn = self.pool.get()?;
        let record = match load_record(&conn, "email", email.trim())? {
            Some(record) => record,
            None => {
                tracing::warn!("Login attempt for unknown email");
                return Err(StoreError::InvalidCredentials);
            }
        };

        if !password::verify_password(plaintext, &record.password_hash) {
            tracing::warn!("Wrong password for user {}", record.id);
            return Err(StoreError::InvalidCredentials);
        }

        Ok(to_public(&conn, record)?)
    }

    pub fn find_by_id(&self, id: &str) -> StoreResult<Option<PublicUser>> {
        let conn = self.pool.get()?;
        Ok(load_public(&conn, "id", id)?)
    }

    pub fn get_by_username(&self, username: &str) -> StoreResult<PublicUser> {
        let conn = self.pool.get()?;
        load_public(&conn, "username", username)?
            .ok_or_else(|| StoreError::NotFound("User not found".into()))
    }

    /// Fails with `Conflict` when a new email or username belongs to another user.
    pub fn ensure_available(
        &self,
        user_id: &str,
        email: Option<&str>,
        username: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.pool.get()?;
        check_available(&conn, user_id, email, username)
    }

    pub fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> StoreResult<PublicUser> {
        let conn = self.pool.get()?;
        if !user_exists(&conn, user_id)? {
            return Err(StoreError::NotFound("User not found".into()));
        }

        let email = non_blank(update.email.as_deref());
        let username = non_blank(update.username.as_deref());
        check_available(&conn, user_id, email.as_deref(), username.as_deref())?;

        conn.execute(
            "UPDATE users SET
                name = COALESCE(?2, name),
                email = COALESCE(?3, email),
                username = COALESCE(?4, username),
                bio = COALESCE(?5, bio),
                location = COALESCE(?6, location),
                website = COALESCE(?7, website),
                profile_picture = COALESCE(?8, profile_picture),
                updated_at = ?9
             WHERE id = ?1",
            params![
                user_id,
                non_blank(update.name.as_deref()),
                email,
                username,
                non_blank(update.bio.as_deref()),
                non_blank(update.location.as_deref()),
                non_blank(update.website.as_deref()),
                non_blank(update.profile_picture.as_deref()),
                now(),
            ],
        )
        .map_err(|e| unique_violation_as_conflict(e, "Email or username already taken"))?;

        load_public(&conn, "id", user_id)?
            .ok_or_else(|| StoreError::NotFound("User not found".into()))
    }

    /// Follow `target_id` if `actor_id` does not follow it yet, otherwise
    /// unfollow. Following notifies the target.
    pub fn toggle_follow(&self, actor_id: &str, target_id: &str) -> StoreResult<FollowState> {
        if actor_id == target_id {
            return Err(StoreError::Invalid(
                "You can't follow/unfollow yourself".into(),
            ));
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !user_exists(&tx, actor_id)? || !user_exists(&tx, target_id)? {
            return Err(StoreError::NotFound("User not found".into()));
        }

        let removed = tx.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![actor_id, target_id],
        )?;

        let state = if removed > 0 {
            FollowState::Unfollowed
        } else {
            tx.execute(
                "INSERT INTO follows (follower_id, followee_id, created_at) VALUES (?1, ?2, ?3)",
                params![actor_id, target_id, now()],
            )?;
            notifications::record(&tx, actor_id, target_id, NotificationKind::Follow)?;
            FollowState::Followed
        };

        tx.commit()?;
        tracing::info!("{} {:?} {}", actor_id, state, target_id);
        Ok(state)
    }

    pub fn followers(&self, username: &str) -> StoreResult<Vec<UserSummary>> {
        self.edge_members(
            username,
            "JOIN users u ON u.id = f.follower_id WHERE f.followee_id = ?1",
        )
    }

    pub fn following(&self, username: &str) -> StoreResult<Vec<UserSummary>> {
        self.edge_members(
            username,
            "JOIN users u ON u.id = f.followee_id WHERE f.follower_id = ?1",
        )
    }

    fn edge_members(&self, username: &str, join: &str) -> StoreResult<Vec<UserSummary>> {
        let conn = self.pool.get()?;
        let user_id = user_id_for_username(&conn, username)?;

        let sql = format!(
            "SELECT {} FROM follows f {} ORDER BY f.rowid",
            summary_columns("u"),
            join
        );
        let mut stmt = conn.prepare(&sql)?;
        let members = stmt
            .query_map(params![user_id], |row| summary_from_row(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        username: row.get(2)?,
        email: row.get(3)?,
        password_hash: row.get(4)?,
        profile_picture: row.get(5)?,
        bio: row.get(6)?,
        location: row.get(7)?,
        website: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// `column` is always one of the unique user columns, never caller input.
fn load_record(conn: &Connection, column: &str, value: &str) -> rusqlite::Result<Option<UserRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column),
        params![value],
        record_from_row,
    )
    .optional()
}

fn load_public(conn: &Connection, column: &str, value: &str) -> rusqlite::Result<Option<PublicUser>> {
    match load_record(conn, column, value)? {
        Some(record) => Ok(Some(to_public(conn, record)?)),
        None => Ok(None),
    }
}

fn to_public(conn: &Connection, record: UserRecord) -> rusqlite::Result<PublicUser> {
    let followers = id_list(
        conn,
        "SELECT follower_id FROM follows WHERE followee_id = ?1 ORDER BY rowid",
        &record.id,
    )?;
    let following = id_list(
        conn,
        "SELECT followee_id FROM follows WHERE follower_id = ?1 ORDER BY rowid",
        &record.id,
    )?;
    let liked_posts = id_list(
        conn,
        "SELECT post_id FROM post_likes WHERE user_id = ?1 ORDER BY rowid",
        &record.id,
    )?;

    Ok(PublicUser {
        id: record.id,
        name: record.name,
        username: record.username,
        email: record.email,
        profile_picture: record.profile_picture,
        bio: record.bio,
        location: record.location,
        website: record.website,
        followers,
        following,
        liked_posts,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

pub(crate) fn id_list(conn: &Connection, sql: &str, key: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params![key], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Whether `value` is already used in `column` by a user other than `except`.
fn taken(conn: &Connection, column: &str, value: &str, except: Option<&str>) -> StoreResult<bool> {
    Ok(conn.query_row(
        &format!(
            "SELECT COUNT(*) > 0 FROM users WHERE {} = ?1 AND id <> COALESCE(?2, '')",
            column
        ),
        params![value, except],
        |row| row.get(0),
    )?)
}

fn check_available(
    conn: &Connection,
    user_id: &str,
    email: Option<&str>,
    username: Option<&str>,
) -> StoreResult<()> {
    if let Some(email) = email.map(str::trim).filter(|s| !s.is_empty()) {
        if taken(conn, "email", email, Some(user_id))? {
            return Err(StoreError::Conflict("Email already registered".into()));
        }
    }
    if let Some(username) = username.map(str::trim).filter(|s| !s.is_empty()) {
        check_not_reserved(username)?;
        if taken(conn, "username", username, Some(user_id))? {
            return Err(StoreError::Conflict("Username already taken".into()));
        }
    }
    Ok(())
}

fn check_not_reserved(username: &str) -> StoreResult<()> {
    if RESERVED_USERNAMES.contains(&username) {
        return Err(StoreError::Invalid(format!(
            "Username \"{}\" is not available",
            username
        )));
    }
    Ok(())
}

fn unique_violation_as_conflict(err: rusqlite::Error, message: &str) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(message.to_string())
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::store::test_support::{file_pool, register, run_together};

    fn registration(username: &str, email: &str) -> Registration {
        Registration {
            name: "Someone".into(),
            email: email.into(),
            password: "pw".into(),
            username: username.into(),
        }
    }

    fn user_count(pool: &DbPool) -> i64 {
        pool.get()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap()
    }

    fn notification_count(pool: &DbPool, recipient: &str) -> i64 {
        pool.get()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1",
                params![recipient],
                |r| r.get(0),
            )
            .unwrap()
    }

    #[test]
    fn register_returns_profile_with_defaults() {
        let pool = test_pool();
        let user = register(&pool, "alice");
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "alice@x.com");
        assert_eq!(user.location, "Earth");
        assert_eq!(user.website, "");
        assert!(user.followers.is_empty());
        assert!(user.following.is_empty());
    }

    #[test]
    fn register_stores_only_a_hash() {
        let pool = test_pool();
        let user = register(&pool, "alice");
        let hash: String = pool
            .get()
            .unwrap()
            .query_row(
                "SELECT password_hash FROM users WHERE id = ?1",
                params![user.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_ne!(hash, "alice-password");
        assert!(password::verify_password("alice-password", &hash));
    }

    #[test]
    fn register_requires_every_field() {
        let pool = test_pool();
        let store = UserStore::new(pool.clone());
        let mut input = registration("alice", "alice@x.com");
        input.password = String::new();
        assert!(matches!(store.register(&input), Err(StoreError::Invalid(_))));

        let mut input = registration("alice", "alice@x.com");
        input.name = "   ".into();
        assert!(matches!(store.register(&input), Err(StoreError::Invalid(_))));
        assert_eq!(user_count(&pool), 0);
    }

    #[test]
    fn register_rejects_duplicate_email_without_creating_record() {
        let pool = test_pool();
        let store = UserStore::new(pool.clone());
        store.register(&registration("alice", "same@x.com")).unwrap();

        let err = store
            .register(&registration("alice2", "same@x.com"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(user_count(&pool), 1);
    }

    #[test]
    fn register_rejects_duplicate_username() {
        let pool = test_pool();
        let store = UserStore::new(pool.clone());
        store.register(&registration("alice", "a@x.com")).unwrap();

        let err = store.register(&registration("alice", "b@x.com")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref m) if m == "Username already taken"));
    }

    #[test]
    fn authenticate_does_not_distinguish_unknown_email_from_wrong_password() {
        let pool = test_pool();
        let store = UserStore::new(pool.clone());
        register(&pool, "alice");

        let wrong_password = store.authenticate("alice@x.com", "nope").unwrap_err();
        let unknown_email = store.authenticate("ghost@x.com", "nope").unwrap_err();
        assert!(matches!(wrong_password, StoreError::InvalidCredentials));
        assert!(matches!(unknown_email, StoreError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
    }

    #[test]
    fn authenticate_returns_profile() {
        let pool = test_pool();
        let created = register(&pool, "alice");
        let user = UserStore::new(pool)
            .authenticate("alice@x.com", "alice-password")
            .unwrap();
        assert_eq!(user, created);
    }

    #[test]
    fn update_profile_applies_only_non_empty_fields() {
        let pool = test_pool();
        let store = UserStore::new(pool.clone());
        let alice = register(&pool, "alice");

        let updated = store
            .update_profile(
                &alice.id,
                &ProfileUpdate {
                    bio: Some("new bio".into()),
                    location: Some("".into()),
                    website: Some("https://alice.dev".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.bio, "new bio");
        assert_eq!(updated.location, "Earth");
        assert_eq!(updated.website, "https://alice.dev");
        assert_eq!(updated.name, alice.name);
    }

    #[test]
    fn update_profile_rejects_taken_email_and_username() {
        let pool = test_pool();
        let store = UserStore::new(pool.clone());
        let alice = register(&pool, "alice");
        register(&pool, "bob");

        let err = store
            .update_profile(
                &alice.id,
                &ProfileUpdate {
                    email: Some("bob@x.com".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref m) if m == "Email already registered"));

        let err = store
            .update_profile(
                &alice.id,
                &ProfileUpdate {
                    username: Some("bob".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref m) if m == "Username already taken"));
    }

    #[test]
    fn update_profile_allows_keeping_own_email() {
        let pool = test_pool();
        let store = UserStore::new(pool.clone());
        let alice = register(&pool, "alice");

        let updated = store
            .update_profile(
                &alice.id,
                &ProfileUpdate {
                    email: Some("alice@x.com".into()),
                    username: Some("alice".into()),
                    name: Some("Alice A.".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Alice A.");
    }

    #[test]
    fn update_profile_unknown_user_is_not_found() {
        let pool = test_pool();
        let err = UserStore::new(pool)
            .update_profile("ghost", &ProfileUpdate::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn follow_is_symmetric_and_notifies() {
        let pool = test_pool();
        let store = UserStore::new(pool.clone());
        let alice = register(&pool, "alice");
        let bob = register(&pool, "bob");

        let state = store.toggle_follow(&bob.id, &alice.id).unwrap();
        assert_eq!(state, FollowState::Followed);

        let alice = store.get_by_username("alice").unwrap();
        let bob = store.get_by_username("bob").unwrap();
        assert_eq!(alice.followers, vec![bob.id.clone()]);
        assert_eq!(bob.following, vec![alice.id.clone()]);
        assert_eq!(notification_count(&pool, &alice.id), 1);
    }

    #[test]
    fn follow_twice_restores_original_state() {
        let pool = test_pool();
        let store = UserStore::new(pool.clone());
        let alice = register(&pool, "alice");
        let bob = register(&pool, "bob");

        store.toggle_follow(&bob.id, &alice.id).unwrap();
        let state = store.toggle_follow(&bob.id, &alice.id).unwrap();
        assert_eq!(state, FollowState::Unfollowed);

        assert!(store.get_by_username("alice").unwrap().followers.is_empty());
        assert!(store.get_by_username("bob").unwrap().following.is_empty());
        // unfollow does not notify
        assert_eq!(notification_count(&pool, &alice.id), 1);
    }

    #[test]
    fn self_follow_is_invalid() {
        let pool = test_pool();
        let alice = register(&pool, "alice");
        let err = UserStore::new(pool.clone())
            .toggle_follow(&alice.id, &alice.id)
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert_eq!(notification_count(&pool, &alice.id), 0);
    }

    #[test]
    fn follow_unknown_user_is_not_found() {
        let pool = test_pool();
        let alice = register(&pool, "alice");
        let err = UserStore::new(pool)
            .toggle_follow(&alice.id, "ghost")
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn followers_and_following_list_display_fields_in_order() {
        let pool = test_pool();
        let store = UserStore::new(pool.clone());
        let alice = register(&pool, "alice");
        let bob = register(&pool, "bob");
        let carol = register(&pool, "carol");

        store.toggle_follow(&bob.id, &alice.id).unwrap();
        store.toggle_follow(&carol.id, &alice.id).unwrap();
        store.toggle_follow(&alice.id, &carol.id).unwrap();

        let followers = store.followers("alice").unwrap();
        let names: Vec<_> = followers.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["bob", "carol"]);
        assert_eq!(followers[0].name, "BOB");

        let following = store.following("alice").unwrap();
        assert_eq!(following.len(), 1);
        assert_eq!(following[0].id, carol.id);

        assert!(matches!(
            store.followers("ghost"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn concurrent_follows_from_different_users_all_land() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = file_pool(&tmp);
        let store = UserStore::new(pool.clone());
        let target = register(&pool, "target");
        let fans: Vec<_> = (0..8)
            .map(|i| register(&pool, &format!("fan{}", i)))
            .collect();

        for round in 0..4 {
            let results = run_together(&fans, |fan| {
                store.toggle_follow(&fan.id, &target.id).map(|_| ())
            });
            for result in results {
                assert!(result.is_ok(), "round {}: {:?}", round, result);
            }
            let expected = if round % 2 == 0 { fans.len() } else { 0 };
            assert_eq!(store.followers("target").unwrap().len(), expected);
        }
        // Two follow rounds, one notification per fan each.
        assert_eq!(notification_count(&pool, &target.id), 2 * fans.len() as i64);
    }

    #[test]
    fn reserved_username_is_rejected() {
        let pool = test_pool();
        let store = UserStore::new(pool.clone());
        let err = store
            .register(&registration("profile", "p@x.com"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert_eq!(user_count(&pool), 0);

        let alice = register(&pool, "alice");
        let update = ProfileUpdate {
            username: Some("profile".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_profile(&alice.id, &update),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store.ensure_available(&alice.id, None, Some("profile")),
            Err(StoreError::Invalid(_))
        ));
        assert_eq!(store.get_by_username("alice").unwrap().id, alice.id);
    }
}
