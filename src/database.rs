use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cache::{CountCache, CountKind};
use crate::models::{clamp_page, num_pages, Comment, Page, Post, PostView, Session, User, PAGE_SIZE};

// Schema statements run by init(). Foreign keys are enabled on every
// connection so the ON DELETE CASCADE clauses fire.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        created INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS posts (
        id INTEGER PRIMARY KEY,
        author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        text TEXT NOT NULL,
        created INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY,
        post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
        author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        text TEXT NOT NULL,
        created INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS follows (
        follower_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        followee_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created INTEGER NOT NULL,
        PRIMARY KEY (follower_id, followee_id)
    )",
    "CREATE TABLE IF NOT EXISTS likes (
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
        created INTEGER NOT NULL,
        PRIMARY KEY (user_id, post_id)
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created INTEGER NOT NULL,
        expires INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_posts_created ON posts(created DESC, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_posts_author_created ON posts(author_id, created DESC)",
    "CREATE INDEX IF NOT EXISTS idx_follows_followee ON follows(followee_id)",
    "CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id)",
    "CREATE INDEX IF NOT EXISTS idx_likes_post ON likes(post_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires)",
];

// Post listing joined with author and counts; ordered newest-first with an id
// tiebreak so the ordering is total and pages never overlap.
const POST_VIEW_SELECT: &str = "SELECT p.id, p.author_id, u.username AS author, p.text, p.created,
        (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id) AS like_count,
        (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count
     FROM posts p JOIN users u ON u.id = p.author_id";

const POST_VIEW_ORDER: &str = "ORDER BY p.created DESC, p.id DESC";

// Async SQLite storage with a connection pool and a small count cache.
pub struct Database {
    pub pool: SqlitePool,
    count_cache: Mutex<CountCache>,
}

impl Database {
    pub async fn new(database_url: &str, cache_capacity: usize) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        Ok(Database {
            pool,
            count_cache: Mutex::new(CountCache::new(cache_capacity)),
        })
    }

    /// In-memory database for tests. A single connection keeps all queries on
    /// the same SQLite memory instance.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Database {
            pool,
            count_cache: Mutex::new(CountCache::new(64)),
        })
    }

    pub async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ---- Users ----

    /// Insert a new user. Returns `None` when the username is already taken,
    /// relying on the UNIQUE constraint so a race can never produce a
    /// duplicate row.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<Option<User>> {
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, created) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(Some(User {
                id: done.last_insert_rowid(),
                username: username.to_string(),
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                created: now,
            })),
            Err(sqlx::Error::Database(db))
                if db.kind() == sqlx::error::ErrorKind::UniqueViolation =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, created FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| user_from_row(&row)))
    }

    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, created FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| user_from_row(&row)))
    }

    /// Delete a user; posts, comments, likes, follows and sessions cascade.
    pub async fn delete_user(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.count_cache.lock().await.clear();
        Ok(())
    }

    // ---- Posts ----

    pub async fn create_post(&self, author_id: i64, text: &str) -> Result<Post> {
        let now = Utc::now().timestamp();

        let result = sqlx::query("INSERT INTO posts (author_id, text, created) VALUES (?, ?, ?)")
            .bind(author_id)
            .bind(text)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(Post {
            id: result.last_insert_rowid(),
            author_id,
            text: text.to_string(),
            created: now,
        })
    }

    /// One page of the global feed, newest first. Out-of-range pages clamp to
    /// the nearest valid page.
    pub async fn feed_page(&self, page: Option<i64>) -> Result<Page<PostView>> {
        let total: i64 = sqlx::query("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?
            .get(0);

        let num_pages = num_pages(total, PAGE_SIZE);
        let page = clamp_page(page, num_pages);

        let sql = format!("{} {} LIMIT ? OFFSET ?", POST_VIEW_SELECT, POST_VIEW_ORDER);
        let rows = sqlx::query(&sql)
            .bind(PAGE_SIZE)
            .bind((page - 1) * PAGE_SIZE)
            .fetch_all(&self.pool)
            .await?;

        Ok(build_page(rows, page, num_pages, total))
    }

    /// One page of posts authored by users the viewer follows.
    pub async fn following_feed_page(
        &self,
        viewer_id: i64,
        page: Option<i64>,
    ) -> Result<Page<PostView>> {
        let total: i64 = sqlx::query(
            "SELECT COUNT(*) FROM posts
             WHERE author_id IN (SELECT followee_id FROM follows WHERE follower_id = ?)",
        )
        .bind(viewer_id)
        .fetch_one(&self.pool)
        .await?
        .get(0);

        let num_pages = num_pages(total, PAGE_SIZE);
        let page = clamp_page(page, num_pages);

        let sql = format!(
            "{} WHERE p.author_id IN (SELECT followee_id FROM follows WHERE follower_id = ?) {} LIMIT ? OFFSET ?",
            POST_VIEW_SELECT, POST_VIEW_ORDER
        );
        let rows = sqlx::query(&sql)
            .bind(viewer_id)
            .bind(PAGE_SIZE)
            .bind((page - 1) * PAGE_SIZE)
            .fetch_all(&self.pool)
            .await?;

        Ok(build_page(rows, page, num_pages, total))
    }

    /// All posts by one author, newest first. Profile pages are not paginated.
    pub async fn posts_by_author(&self, author_id: i64) -> Result<Vec<PostView>> {
        let sql = format!(
            "{} WHERE p.author_id = ? {}",
            POST_VIEW_SELECT, POST_VIEW_ORDER
        );
        let rows = sqlx::query(&sql)
            .bind(author_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(post_view_from_row).collect())
    }

    // ---- Follows ----

    pub async fn follow(&self, follower_id: i64, followee_id: i64) -> Result<()> {
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT OR IGNORE INTO follows (follower_id, followee_id, created) VALUES (?, ?, ?)",
        )
        .bind(follower_id)
        .bind(followee_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.count_cache
            .lock()
            .await
            .invalidate_pair(follower_id, followee_id);
        Ok(())
    }

    pub async fn unfollow(&self, follower_id: i64, followee_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM follows WHERE follower_id = ? AND followee_id = ?")
            .bind(follower_id)
            .bind(followee_id)
            .execute(&self.pool)
            .await?;

        self.count_cache
            .lock()
            .await
            .invalidate_pair(follower_id, followee_id);
        Ok(())
    }

    pub async fn is_following(&self, follower_id: i64, followee_id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM follows WHERE follower_id = ? AND followee_id = ?")
            .bind(follower_id)
            .bind(followee_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    pub async fn follower_count(&self, user_id: i64) -> Result<i64> {
        if let Some(count) = self.count_cache.lock().await.get(CountKind::Followers, user_id) {
            return Ok(count);
        }

        let count: i64 = sqlx::query("SELECT COUNT(*) FROM follows WHERE followee_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?
            .get(0);

        self.count_cache
            .lock()
            .await
            .insert(CountKind::Followers, user_id, count);
        Ok(count)
    }

    pub async fn following_count(&self, user_id: i64) -> Result<i64> {
        if let Some(count) = self.count_cache.lock().await.get(CountKind::Following, user_id) {
            return Ok(count);
        }

        let count: i64 = sqlx::query("SELECT COUNT(*) FROM follows WHERE follower_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?
            .get(0);

        self.count_cache
            .lock()
            .await
            .insert(CountKind::Following, user_id, count);
        Ok(count)
    }

    // ---- Comments and likes ----

    pub async fn create_comment(
        &self,
        post_id: i64,
        author_id: i64,
        text: &str,
    ) -> Result<Comment> {
        let now = Utc::now().timestamp();

        let result =
            sqlx::query("INSERT INTO comments (post_id, author_id, text, created) VALUES (?, ?, ?, ?)")
                .bind(post_id)
                .bind(author_id)
                .bind(text)
                .bind(now)
                .execute(&self.pool)
                .await?;

        Ok(Comment {
            id: result.last_insert_rowid(),
            post_id,
            author_id,
            text: text.to_string(),
            created: now,
        })
    }

    pub async fn like(&self, user_id: i64, post_id: i64) -> Result<()> {
        let now = Utc::now().timestamp();

        sqlx::query("INSERT OR IGNORE INTO likes (user_id, post_id, created) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(post_id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn unlike(&self, user_id: i64, post_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM likes WHERE user_id = ? AND post_id = ?")
            .bind(user_id)
            .bind(post_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn like_count(&self, post_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM likes WHERE post_id = ?")
            .bind(post_id)
            .fetch_one(&self.pool)
            .await?
            .get(0);

        Ok(count)
    }

    pub async fn comment_count(&self, post_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM comments WHERE post_id = ?")
            .bind(post_id)
            .fetch_one(&self.pool)
            .await?
            .get(0);

        Ok(count)
    }

    // ---- Sessions ----

    /// Create a session for the user and return its opaque token. Expired
    /// sessions are purged on the way in.
    pub async fn create_session(&self, user_id: i64, ttl_secs: i64) -> Result<Session> {
        let now = Utc::now().timestamp();

        sqlx::query("DELETE FROM sessions WHERE expires <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        let token = Uuid::new_v4().simple().to_string();
        let expires = now + ttl_secs;

        sqlx::query("INSERT INTO sessions (token, user_id, created, expires) VALUES (?, ?, ?, ?)")
            .bind(&token)
            .bind(user_id)
            .bind(now)
            .bind(expires)
            .execute(&self.pool)
            .await?;

        Ok(Session {
            token,
            user_id,
            created: now,
            expires,
        })
    }

    /// Resolve a session token to its user. Expired tokens resolve to `None`.
    pub async fn session_user(&self, token: &str) -> Result<Option<User>> {
        let now = Utc::now().timestamp();

        let row = sqlx::query(
            "SELECT u.id, u.username, u.email, u.password_hash, u.created
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ? AND s.expires > ?",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| user_from_row(&row)))
    }

    pub async fn delete_session(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        created: row.get("created"),
    }
}

fn post_view_from_row(row: &SqliteRow) -> PostView {
    PostView {
        id: row.get("id"),
        author_id: row.get("author_id"),
        author: row.get("author"),
        text: row.get("text"),
        created: row.get("created"),
        like_count: row.get("like_count"),
        comment_count: row.get("comment_count"),
    }
}

fn build_page(rows: Vec<SqliteRow>, page: i64, num_pages: i64, total: i64) -> Page<PostView> {
    Page {
        items: rows.iter().map(post_view_from_row).collect(),
        page,
        num_pages,
        total,
        has_next: page < num_pages,
        has_previous: page > 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.init().await.unwrap();
        db
    }

    #[tokio::test]
    async fn duplicate_username_returns_none() {
        let db = test_db().await;

        let first = db.create_user("alice", "a@example.com", "hash").await.unwrap();
        assert!(first.is_some());

        let second = db.create_user("alice", "other@example.com", "hash").await.unwrap();
        assert!(second.is_none());

        let count: i64 = sqlx::query("SELECT COUNT(*) FROM users WHERE username = 'alice'")
            .fetch_one(&db.pool)
            .await
            .unwrap()
            .get(0);
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn deleting_user_cascades() {
        let db = test_db().await;

        let alice = db.create_user("alice", "a@example.com", "h").await.unwrap().unwrap();
        let bob = db.create_user("bob", "b@example.com", "h").await.unwrap().unwrap();

        let post = db.create_post(alice.id, "hello").await.unwrap();
        db.create_comment(post.id, bob.id, "hi!").await.unwrap();
        db.like(bob.id, post.id).await.unwrap();
        db.follow(bob.id, alice.id).await.unwrap();
        db.create_session(alice.id, 3600).await.unwrap();

        db.delete_user(alice.id).await.unwrap();

        let feed = db.feed_page(None).await.unwrap();
        assert_eq!(feed.total, 0);
        assert_eq!(db.comment_count(post.id).await.unwrap(), 0);
        assert_eq!(db.like_count(post.id).await.unwrap(), 0);
        assert_eq!(db.following_count(bob.id).await.unwrap(), 0);

        let sessions: i64 = sqlx::query("SELECT COUNT(*) FROM sessions")
            .fetch_one(&db.pool)
            .await
            .unwrap()
            .get(0);
        assert_eq!(sessions, 0);
    }

    #[tokio::test]
    async fn deleting_post_cascades_to_comments_and_likes() {
        let db = test_db().await;

        let alice = db.create_user("alice", "a@example.com", "h").await.unwrap().unwrap();
        let post = db.create_post(alice.id, "hello").await.unwrap();
        db.create_comment(post.id, alice.id, "self-reply").await.unwrap();
        db.like(alice.id, post.id).await.unwrap();

        sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(post.id)
            .execute(&db.pool)
            .await
            .unwrap();

        assert_eq!(db.comment_count(post.id).await.unwrap(), 0);
        assert_eq!(db.like_count(post.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn follow_is_idempotent_and_counts_invalidate() {
        let db = test_db().await;

        let alice = db.create_user("alice", "a@example.com", "h").await.unwrap().unwrap();
        let bob = db.create_user("bob", "b@example.com", "h").await.unwrap().unwrap();

        // Prime the cache before any edges exist
        assert_eq!(db.follower_count(bob.id).await.unwrap(), 0);

        db.follow(alice.id, bob.id).await.unwrap();
        db.follow(alice.id, bob.id).await.unwrap();
        assert_eq!(db.follower_count(bob.id).await.unwrap(), 1);
        assert_eq!(db.following_count(alice.id).await.unwrap(), 1);
        assert!(db.is_following(alice.id, bob.id).await.unwrap());

        db.unfollow(alice.id, bob.id).await.unwrap();
        assert_eq!(db.follower_count(bob.id).await.unwrap(), 0);
        assert!(!db.is_following(alice.id, bob.id).await.unwrap());
    }

    #[tokio::test]
    async fn feed_pages_never_overlap_or_skip() {
        let db = test_db().await;

        let alice = db.create_user("alice", "a@example.com", "h").await.unwrap().unwrap();
        for i in 0..25 {
            db.create_post(alice.id, &format!("post {}", i)).await.unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        let mut pages = 0;
        for page in 1..=3 {
            let result = db.feed_page(Some(page)).await.unwrap();
            assert_eq!(result.num_pages, 3);
            pages += result.items.len();
            for item in &result.items {
                assert!(seen.insert(item.id), "post {} appeared twice", item.id);
            }
        }
        assert_eq!(pages, 25);

        // Out-of-range pages clamp to the nearest valid page
        let clamped = db.feed_page(Some(99)).await.unwrap();
        assert_eq!(clamped.page, 3);
        assert!(!clamped.has_next);
        let clamped = db.feed_page(Some(-1)).await.unwrap();
        assert_eq!(clamped.page, 1);
        assert!(!clamped.has_previous);
    }

    #[tokio::test]
    async fn following_feed_only_shows_followed_authors() {
        let db = test_db().await;

        let alice = db.create_user("alice", "a@example.com", "h").await.unwrap().unwrap();
        let bob = db.create_user("bob", "b@example.com", "h").await.unwrap().unwrap();
        let carol = db.create_user("carol", "c@example.com", "h").await.unwrap().unwrap();

        db.create_post(bob.id, "from bob").await.unwrap();
        db.create_post(carol.id, "from carol").await.unwrap();

        db.follow(alice.id, bob.id).await.unwrap();

        let feed = db.following_feed_page(alice.id, None).await.unwrap();
        assert_eq!(feed.total, 1);
        assert_eq!(feed.items[0].author, "bob");
    }

    #[tokio::test]
    async fn post_view_carries_like_and_comment_counts() {
        let db = test_db().await;

        let alice = db.create_user("alice", "a@example.com", "h").await.unwrap().unwrap();
        let bob = db.create_user("bob", "b@example.com", "h").await.unwrap().unwrap();
        let post = db.create_post(alice.id, "hello").await.unwrap();

        db.like(alice.id, post.id).await.unwrap();
        db.like(bob.id, post.id).await.unwrap();
        db.create_comment(post.id, bob.id, "hi").await.unwrap();

        let feed = db.feed_page(None).await.unwrap();
        assert_eq!(feed.items[0].like_count, 2);
        assert_eq!(feed.items[0].comment_count, 1);
    }

    #[tokio::test]
    async fn expired_session_resolves_to_none() {
        let db = test_db().await;

        let alice = db.create_user("alice", "a@example.com", "h").await.unwrap().unwrap();

        let live = db.create_session(alice.id, 3600).await.unwrap();
        assert!(db.session_user(&live.token).await.unwrap().is_some());

        let expired = db.create_session(alice.id, -1).await.unwrap();
        assert!(db.session_user(&expired.token).await.unwrap().is_none());

        db.delete_session(&live.token).await.unwrap();
        assert!(db.session_user(&live.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn on_disk_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("network.db").display());

        {
            let db = Database::new(&url, 16).await.unwrap();
            db.init().await.unwrap();
            db.create_user("alice", "a@example.com", "h").await.unwrap();
            db.pool.close().await;
        }

        let db = Database::new(&url, 16).await.unwrap();
        db.init().await.unwrap();
        assert!(db.get_user_by_username("alice").await.unwrap().is_some());
    }
}
