use super::schema::Database;
use super::types::{Feed, StoreError};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Register a feed.
    ///
    /// Registering a URL that is already known is a no-op: the existing id and
    /// name are kept.
    ///
    /// # Returns
    ///
    /// `true` if a new feed row was created.
    pub async fn add_feed(&self, url: &str, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO feeds (url, feed_name) VALUES (?, ?) ON CONFLICT(url) DO NOTHING",
        )
        .bind(url)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deregister a feed and delete every article whose source is its URL.
    ///
    /// Both deletes run in one transaction. Read markers are left alone.
    ///
    /// # Returns
    ///
    /// The number of articles removed with the feed.
    pub async fn remove_feed(&self, url: &str) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM feeds WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?;

        let removed = sqlx::query("DELETE FROM articles WHERE source = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        tracing::debug!(feed = %url, articles = removed, "Feed removed");
        Ok(removed)
    }

    /// All registered feeds in registration order
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let feeds = sqlx::query_as::<_, Feed>("SELECT id, url, feed_name FROM feeds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }
}
