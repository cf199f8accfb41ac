use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds a lock on the database file
    #[error("The feed cache database is locked by another process. Please close it and try again.")]
    Locked,

    /// Schema setup failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A single stored row could not be decoded into an article
    #[error("Corrupt article row: {0}")]
    RowDecode(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

/// Every query error goes through lock detection, so `?` on a busy database
/// yields [`StoreError::Locked`].
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from_sqlx(err)
    }
}

impl StoreError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StoreError::Locked;
        }

        StoreError::Database(err)
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Internal row type for article queries.
///
/// Every column decodes as optional so that a damaged row surfaces as a
/// [`StoreError::RowDecode`] from [`ArticleDbRow::into_article`] instead of a
/// silently defaulted field.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub source: Option<String>,
    pub pubdate: Option<String>,
    pub fetched_at: Option<String>,
    pub enclosure_url: Option<String>,
    pub enclosure_type: Option<String>,
    pub enclosure_length: Option<String>,
}

fn required(value: Option<String>, column: &str) -> Result<String, StoreError> {
    value.ok_or_else(|| StoreError::RowDecode(format!("{} is NULL", column)))
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Result<Article, StoreError> {
        // Rows written before enclosures were nullable carry "" instead of NULL
        let enclosure = self
            .enclosure_url
            .filter(|url| !url.is_empty())
            .map(|url| Enclosure {
                url,
                mime_type: self.enclosure_type.unwrap_or_default(),
                length: self.enclosure_length.unwrap_or_default(),
            });

        Ok(Article {
            title: required(self.title, "title")?,
            link: required(self.link, "link")?,
            description: required(self.description, "description")?,
            content: required(self.content, "content")?,
            source: required(self.source, "source")?,
            pubdate: required(self.pubdate, "pubdate")?,
            fetched_at: self.fetched_at,
            enclosure,
        })
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub feed_name: String,
}

/// Media attached to a feed item (podcast audio, video, ...)
///
/// All three attributes are kept exactly as the feed declared them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub length: String,
}

/// The canonical cached article.
///
/// `link` is the identity used for deduplication. `fetched_at` is written by
/// the store on every upsert and is not part of the JSON shape handed to
/// readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub link: String,
    pub description: String,
    pub content: String,
    pub source: String,
    pub pubdate: String,
    #[serde(skip)]
    pub fetched_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosure: Option<Enclosure>,
}
