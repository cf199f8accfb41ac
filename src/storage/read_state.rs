use super::schema::Database;
use super::types::StoreError;

impl Database {
    // ========================================================================
    // Read State Operations
    // ========================================================================

    /// Mark a link as read. The link does not have to be cached.
    pub async fn mark_read(&self, link: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO read_articles (link) VALUES (?)")
            .bind(link)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Clear the read marker for a link
    pub async fn mark_unread(&self, link: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM read_articles WHERE link = ?")
            .bind(link)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All links marked as read, sorted
    pub async fn list_read(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT link FROM read_articles ORDER BY link")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(link,)| link).collect())
    }
}
