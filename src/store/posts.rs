use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;

use crate::db::models::{Comment, NotificationKind, Post};
use crate::state::DbPool;
use crate::store::users::id_list;
use crate::store::{
    new_id, non_blank, notifications, now, summary_columns, summary_from_row, user_exists,
    user_id_for_username, StoreError, StoreResult,
};

/// Which posts a listing selects. Every listing is newest first.
#[derive(Debug, Clone, Copy)]
enum Selection<'a> {
    All,
    ById(&'a str),
    ByAuthor(&'a str),
    FollowedBy(&'a str),
    LikedBy(&'a str),
}

impl Selection<'_> {
    fn filter(&self) -> (&'static str, Option<&str>) {
        match *self {
            Selection::All => ("", None),
            Selection::ById(id) => ("WHERE p.id = ?1", Some(id)),
            Selection::ByAuthor(id) => ("WHERE p.author_id = ?1", Some(id)),
            Selection::FollowedBy(id) => (
                "WHERE p.author_id IN (SELECT followee_id FROM follows WHERE follower_id = ?1)",
                Some(id),
            ),
            Selection::LikedBy(id) => (
                "WHERE p.id IN (SELECT post_id FROM post_likes WHERE user_id = ?1)",
                Some(id),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LikeOutcome {
    pub liked: bool,
    pub likes: Vec<String>,
}

/// Posts with their likes and embedded comments.
#[derive(Clone)]
pub struct PostStore {
    pool: DbPool,
}

impl PostStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// `image` is the URL returned by image storage, if any.
    pub fn create(
        &self,
        author_id: &str,
        text: Option<&str>,
        image: Option<&str>,
    ) -> StoreResult<Post> {
        let conn = self.pool.get()?;
        if !user_exists(&conn, author_id)? {
            return Err(StoreError::NotFound("User not found!".into()));
        }

        let text = non_blank(text);
        let image = non_blank(image);
        if text.is_none() && image.is_none() {
            return Err(StoreError::Invalid(
                "Post must have either one image or text.".into(),
            ));
        }

        let id = new_id();
        let ts = now();
        conn.execute(
            "INSERT INTO posts (id, author_id, text, image, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, author_id, text, image, ts],
        )?;
        tracing::info!("User {} created post {}", author_id, id);

        fetch_one(&conn, &id)
    }

    pub fn all(&self) -> StoreResult<Vec<Post>> {
        let conn = self.pool.get()?;
        fetch(&conn, Selection::All)
    }

    pub fn by_author(&self, username: &str) -> StoreResult<Vec<Post>> {
        let conn = self.pool.get()?;
        let author_id = user_id_for_username(&conn, username)?;
        fetch(&conn, Selection::ByAuthor(&author_id))
    }

    /// Posts written by anyone `user_id` follows.
    pub fn following_feed(&self, user_id: &str) -> StoreResult<Vec<Post>> {
        let conn = self.pool.get()?;
        if !user_exists(&conn, user_id)? {
            return Err(StoreError::NotFound("User not found!".into()));
        }
        fetch(&conn, Selection::FollowedBy(user_id))
    }

    /// Posts `username` has liked.
    pub fn liked_by(&self, username: &str) -> StoreResult<Vec<Post>> {
        let conn = self.pool.get()?;
        let user_id = user_id_for_username(&conn, username)?;
        fetch(&conn, Selection::LikedBy(&user_id))
    }

    pub fn get(&self, post_id: &str) -> StoreResult<Post> {
        let conn = self.pool.get()?;
        fetch_one(&conn, post_id)
    }

    /// Only the author may delete. Likes and comments go with the post.
    pub fn delete(&self, post_id: &str, requester_id: &str) -> StoreResult<()> {
        let conn = self.pool.get()?;
        let author_id = author_of(&conn, post_id)?;
        if author_id != requester_id {
            return Err(StoreError::Forbidden(
                "Unauthorized, You can not delete this post.".into(),
            ));
        }

        conn.execute("DELETE FROM posts WHERE id = ?1", params![post_id])?;
        tracing::info!("User {} deleted post {}", requester_id, post_id);
        Ok(())
    }

    /// Flip `user_id`'s like on the post. A new like notifies the author
    /// unless the author liked their own post.
    pub fn toggle_like(&self, post_id: &str, user_id: &str) -> StoreResult<LikeOutcome> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let author_id = author_of(&tx, post_id)?;

        let removed = tx.execute(
            "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, user_id],
        )?;

        let liked = if removed > 0 {
            false
        } else {
            tx.execute(
                "INSERT INTO post_likes (post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![post_id, user_id, now()],
            )?;
            notifications::record(&tx, user_id, &author_id, NotificationKind::Like)?;
            true
        };

        let likes = likes_of(&tx, post_id)?;
        tx.commit()?;
        Ok(LikeOutcome { liked, likes })
    }

    /// Prepend a comment. Commenting on someone else's post notifies them.
    pub fn add_comment(&self, post_id: &str, user_id: &str, text: &str) -> StoreResult<Comment> {
        if text.trim().is_empty() {
            return Err(StoreError::Invalid("Text field is required.".into()));
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let author_id = author_of(&tx, post_id)?;

        let ts = now();
        tx.execute(
            "INSERT INTO comments (post_id, user_id, text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![post_id, user_id, text, ts],
        )?;
        notifications::record(&tx, user_id, &author_id, NotificationKind::Comment)?;

        let user = tx
            .query_row(
                &format!("SELECT {} FROM users u WHERE u.id = ?1", summary_columns("u")),
                params![user_id],
                |row| summary_from_row(row, 0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound("User not found!".into()))?;

        tx.commit()?;
        Ok(Comment {
            user,
            text: text.to_string(),
            created_at: ts,
        })
    }
}

fn author_of(conn: &Connection, post_id: &str) -> StoreResult<String> {
    conn.query_row(
        "SELECT author_id FROM posts WHERE id = ?1",
        params![post_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound("Post not found!".into()))
}

fn likes_of(conn: &Connection, post_id: &str) -> rusqlite::Result<Vec<String>> {
    id_list(
        conn,
        "SELECT user_id FROM post_likes WHERE post_id = ?1 ORDER BY rowid",
        post_id,
    )
}

fn comments_of(conn: &Connection, post_id: &str) -> rusqlite::Result<Vec<Comment>> {
    let sql = format!(
        "SELECT c.text, c.created_at, {}
         FROM comments c
         JOIN users u ON u.id = c.user_id
         WHERE c.post_id = ?1
         ORDER BY c.rowid DESC",
        summary_columns("u")
    );
    let mut stmt = conn.prepare(&sql)?;
    let comments = stmt
        .query_map(params![post_id], |row| {
            Ok(Comment {
                text: row.get(0)?,
                created_at: row.get(1)?,
                user: summary_from_row(row, 2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

fn fetch_one(conn: &Connection, post_id: &str) -> StoreResult<Post> {
    fetch(conn, Selection::ById(post_id))?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound("Post not found!".into()))
}

fn fetch(conn: &Connection, selection: Selection<'_>) -> StoreResult<Vec<Post>> {
    let (filter, key) = selection.filter();
    let sql = format!(
        "SELECT p.id, p.text, p.image, p.created_at, p.updated_at, {}
         FROM posts p
         JOIN users u ON u.id = p.author_id
         {}
         ORDER BY p.created_at DESC, p.rowid DESC",
        summary_columns("u"),
        filter
    );

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row<'_>| {
        Ok(Post {
            id: row.get(0)?,
            text: row.get(1)?,
            image: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            author: summary_from_row(row, 5)?,
            likes: Vec::new(),
            comments: Vec::new(),
        })
    };
    let mut posts = match key {
        Some(key) => stmt.query_map(params![key], map_row)?.collect::<Result<Vec<_>, _>>()?,
        None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
    };

    for post in &mut posts {
        post.likes = likes_of(conn, &post.id)?;
        post.comments = comments_of(conn, &post.id)?;
    }
    Ok(posts)
}
