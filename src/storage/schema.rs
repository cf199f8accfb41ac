use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StoreError;

// ============================================================================
// Database
// ============================================================================

/// SQLite-backed feed cache.
///
/// Cloning is cheap (the pool is reference counted), so one handle is opened at
/// startup and handed to the refresher and to every reader.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if another process has the database locked
    /// (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `StoreError::Migration` if the schema could not be created.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: wait up to 5 seconds for the writer lock before SQLITE_BUSY.
        // Concurrent feed refreshes all write through the same file.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        // An in-memory database lives only as long as its connection, so it gets
        // exactly one that is never recycled.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| match StoreError::from_sqlx(e) {
            StoreError::Locked => StoreError::Locked,
            other => StoreError::Migration(other.to_string()),
        })?;

        tracing::debug!(path = %path, "Feed cache opened");
        Ok(db)
    }

    /// Create the schema inside one transaction.
    ///
    /// Every statement uses `IF NOT EXISTS`, so running this against an existing
    /// database on each startup is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT UNIQUE NOT NULL,
                feed_name TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Article text columns stay nullable: a NULL there is a corrupt row that
        // the listing skips instead of failing on.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT,
                link TEXT UNIQUE NOT NULL,
                description TEXT,
                content TEXT,
                source TEXT,
                pubdate TEXT,
                fetched_at TEXT,
                enclosure_url TEXT,
                enclosure_type TEXT,
                enclosure_length TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // remove_feed deletes by source
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_source ON articles(source)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS read_articles (
                link TEXT PRIMARY KEY
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory() {
        let db = Database::open(":memory:").await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(names, vec!["articles", "feeds", "read_articles"]);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.add_feed("https://example.com/rss", "Example")
            .await
            .unwrap();

        db.migrate().await.unwrap();
        db.migrate().await.unwrap();

        let feeds = db.list_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1, "re-running migrations must keep data");
    }

    #[tokio::test]
    async fn test_reopen_file_database() {
        let dir = std::env::temp_dir().join(format!(
            "feedcache_schema_test_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cache.db");
        let path_str = path.to_str().unwrap();
        let _ = std::fs::remove_file(&path);

        {
            let db = Database::open(path_str).await.unwrap();
            db.add_feed("https://example.com/rss", "Example")
                .await
                .unwrap();
            db.pool.close().await;
        }

        let db = Database::open(path_str).await.unwrap();
        let feeds = db.list_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].feed_name, "Example");

        db.pool.close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }
}
