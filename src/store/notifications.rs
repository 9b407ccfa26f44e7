use rusqlite::{params, Connection};

use crate::db::models::{Notification, NotificationKind};
use crate::state::DbPool;
use crate::store::{new_id, now, summary_columns, summary_from_row, StoreResult};

/// Append a notification. Runs on the caller's connection so it commits
/// together with the action that caused it. Self-directed actions are dropped.
pub(crate) fn record(
    conn: &Connection,
    sender_id: &str,
    recipient_id: &str,
    kind: NotificationKind,
) -> rusqlite::Result<()> {
    if sender_id == recipient_id {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO notifications (id, sender_id, recipient_id, kind, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![new_id(), sender_id, recipient_id, kind.as_str(), now()],
    )?;
    tracing::debug!("Notified {} of {} from {}", recipient_id, kind, sender_id);
    Ok(())
}

#[derive(Clone)]
pub struct NotificationStore {
    pool: DbPool,
}

impl NotificationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Newest first, then marks everything addressed to `user_id` as read.
    /// The returned records carry the read flag as it was before marking.
    pub fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<Notification>> {
        let conn = self.pool.get()?;

        let sql = format!(
            "SELECT n.id, n.recipient_id, n.kind, n.read, n.created_at, {}
             FROM notifications n
             JOIN users s ON s.id = n.sender_id
             WHERE n.recipient_id = ?1
             ORDER BY n.created_at DESC, n.rowid DESC",
            summary_columns("s")
        );
        let mut stmt = conn.prepare(&sql)?;
        let notifications = stmt
            .query_map(params![user_id], |row| {
                let kind: String = row.get(2)?;
                let kind = kind.parse::<NotificationKind>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })?;
                Ok(Notification {
                    id: row.get(0)?,
                    to: row.get(1)?,
                    kind,
                    read: row.get(3)?,
                    created_at: row.get(4)?,
                    from: summary_from_row(row, 5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        conn.execute(
            "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
            params![user_id],
        )?;

        Ok(notifications)
    }

    /// Removes every notification addressed to `user_id`; returns how many.
    pub fn delete_all_for_user(&self, user_id: &str) -> StoreResult<usize> {
        let conn = self.pool.get()?;
        let deleted = conn.execute(
            "DELETE FROM notifications WHERE recipient_id = ?1",
            params![user_id],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::store::test_support::register;

    fn record_with(pool: &DbPool, from: &str, to: &str, kind: NotificationKind) {
        let conn = pool.get().unwrap();
        record(&conn, from, to, kind).unwrap();
    }

    #[test]
    fn self_directed_events_are_not_recorded() {
        let pool = test_pool();
        let alice = register(&pool, "alice");
        record_with(&pool, &alice.id, &alice.id, NotificationKind::Like);

        let store = NotificationStore::new(pool);
        assert!(store.list_for_user(&alice.id).unwrap().is_empty());
    }

    #[test]
    fn list_is_newest_first_with_sender_fields() {
        let pool = test_pool();
        let alice = register(&pool, "alice");
        let bob = register(&pool, "bob");
        record_with(&pool, &bob.id, &alice.id, NotificationKind::Follow);
        record_with(&pool, &bob.id, &alice.id, NotificationKind::Like);
        record_with(&pool, &bob.id, &alice.id, NotificationKind::Comment);

        let list = NotificationStore::new(pool).list_for_user(&alice.id).unwrap();
        let kinds: Vec<_> = list.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NotificationKind::Comment,
                NotificationKind::Like,
                NotificationKind::Follow
            ]
        );
        assert_eq!(list[0].from.username, "bob");
        assert_eq!(list[0].to, alice.id);
    }

    #[test]
    fn listing_marks_notifications_read() {
        let pool = test_pool();
        let alice = register(&pool, "alice");
        let bob = register(&pool, "bob");
        record_with(&pool, &bob.id, &alice.id, NotificationKind::Follow);
        record_with(&pool, &alice.id, &bob.id, NotificationKind::Follow);

        let store = NotificationStore::new(pool);
        let first = store.list_for_user(&alice.id).unwrap();
        assert!(!first[0].read);

        let second = store.list_for_user(&alice.id).unwrap();
        assert_eq!(second.len(), 1);
        assert!(second[0].read);

        // other recipients are untouched
        let bobs = store.list_for_user(&bob.id).unwrap();
        assert!(!bobs[0].read);
    }

    #[test]
    fn delete_all_only_touches_recipient() {
        let pool = test_pool();
        let alice = register(&pool, "alice");
        let bob = register(&pool, "bob");
        record_with(&pool, &bob.id, &alice.id, NotificationKind::Follow);
        record_with(&pool, &bob.id, &alice.id, NotificationKind::Like);
        record_with(&pool, &alice.id, &bob.id, NotificationKind::Follow);

        let store = NotificationStore::new(pool);
        assert_eq!(store.delete_all_for_user(&alice.id).unwrap(), 2);
        assert_eq!(store.delete_all_for_user(&alice.id).unwrap(), 0);
        assert!(store.list_for_user(&alice.id).unwrap().is_empty());
        assert_eq!(store.list_for_user(&bob.id).unwrap().len(), 1);
    }
}
