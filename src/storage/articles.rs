use chrono::{SecondsFormat, Utc};
use sqlx::{FromRow, Row};

use super::schema::Database;
use super::types::{Article, ArticleDbRow, StoreError};

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Insert an article, or update every mutable column if its link is
    /// already cached.
    ///
    /// `source` is always the registration URL of the feed being refreshed and
    /// `fetched_at` is always the current time, whatever the parsed article
    /// carried. The whole row is written by one statement, so a concurrent
    /// reader sees either the old row or the new one.
    pub async fn upsert_article(&self, article: &Article, feed_url: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let enclosure = article.enclosure.as_ref();

        sqlx::query(
            r#"
            INSERT INTO articles (
                title, link, description, content, source, pubdate, fetched_at,
                enclosure_url, enclosure_type, enclosure_length
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(link) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                content = excluded.content,
                source = excluded.source,
                pubdate = excluded.pubdate,
                fetched_at = excluded.fetched_at,
                enclosure_url = excluded.enclosure_url,
                enclosure_type = excluded.enclosure_type,
                enclosure_length = excluded.enclosure_length
        "#,
        )
        .bind(&article.title)
        .bind(&article.link)
        .bind(&article.description)
        .bind(&article.content)
        .bind(feed_url)
        .bind(&article.pubdate)
        .bind(&now)
        .bind(enclosure.map(|e| e.url.as_str()))
        .bind(enclosure.map(|e| e.mime_type.as_str()))
        .bind(enclosure.map(|e| e.length.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Return every cached article in insertion order.
    ///
    /// A row that cannot be decoded is logged and skipped; the listing itself
    /// only fails if the query does.
    pub async fn list_articles(&self) -> Result<Vec<Article>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT title, link, description, content, source, pubdate, fetched_at,
                   enclosure_url, enclosure_type, enclosure_length
            FROM articles
            ORDER BY id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut articles = Vec::with_capacity(rows.len());
        for row in &rows {
            let decoded = ArticleDbRow::from_row(row)
                .map_err(|e| StoreError::RowDecode(e.to_string()))
                .and_then(ArticleDbRow::into_article);

            match decoded {
                Ok(article) => articles.push(article),
                Err(err) => {
                    let link = row.try_get::<Option<String>, _>("link").ok().flatten();
                    tracing::warn!(
                        link = link.as_deref().unwrap_or("<unknown>"),
                        error = %err,
                        "Skipping undecodable article row"
                    );
                }
            }
        }

        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Article, Database, Enclosure};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_article(slug: &str, title: &str) -> Article {
        Article {
            title: title.to_string(),
            link: format!("https://example.com/{}", slug),
            description: "Test description".to_string(),
            content: String::new(),
            source: "Declared Feed Title".to_string(),
            pubdate: "Mon, 01 Jan 2024 00:00:00 GMT".to_string(),
            fetched_at: None,
            enclosure: None,
        }
    }

    const FEED_URL: &str = "https://feed.example.com/rss";

    #[tokio::test]
    async fn test_upsert_inserts_new_article() {
        let db = test_db().await;
        db.upsert_article(&test_article("1", "First"), FEED_URL)
            .await
            .unwrap();

        let articles = db.list_articles().await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "First");
        assert_eq!(articles[0].link, "https://example.com/1");
        assert!(articles[0].fetched_at.is_some());
    }

    #[tokio::test]
    async fn test_upsert_source_is_feed_url_not_declared_title() {
        let db = test_db().await;
        db.upsert_article(&test_article("1", "First"), FEED_URL)
            .await
            .unwrap();

        let articles = db.list_articles().await.unwrap();
        assert_eq!(articles[0].source, FEED_URL);
    }

    #[tokio::test]
    async fn test_upsert_same_link_keeps_one_row_and_bumps_fetched_at() {
        let db = test_db().await;
        let article = test_article("1", "First");

        db.upsert_article(&article, FEED_URL).await.unwrap();
        let first = db.list_articles().await.unwrap()[0].fetched_at.clone().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        db.upsert_article(&article, FEED_URL).await.unwrap();

        let articles = db.list_articles().await.unwrap();
        assert_eq!(articles.len(), 1);
        let second = articles[0].fetched_at.clone().unwrap();
        assert!(second > first, "{} should be later than {}", second, first);
    }

    #[tokio::test]
    async fn test_upsert_updates_all_mutable_fields() {
        let db = test_db().await;
        let mut article = test_article("1", "Original");
        article.enclosure = Some(Enclosure {
            url: "https://example.com/ep1.mp3".to_string(),
            mime_type: "audio/mpeg".to_string(),
            length: "1234".to_string(),
        });
        db.upsert_article(&article, FEED_URL).await.unwrap();

        let updated = Article {
            title: "Updated".to_string(),
            description: "New description".to_string(),
            content: "<p>Full text</p>".to_string(),
            pubdate: "Tue, 02 Jan 2024 00:00:00 GMT".to_string(),
            enclosure: None,
            ..article.clone()
        };
        db.upsert_article(&updated, "https://moved.example.com/rss")
            .await
            .unwrap();

        let articles = db.list_articles().await.unwrap();
        assert_eq!(articles.len(), 1);
        let stored = &articles[0];
        assert_eq!(stored.title, "Updated");
        assert_eq!(stored.description, "New description");
        assert_eq!(stored.content, "<p>Full text</p>");
        assert_eq!(stored.pubdate, "Tue, 02 Jan 2024 00:00:00 GMT");
        assert_eq!(stored.source, "https://moved.example.com/rss");
        assert_eq!(stored.enclosure, None, "enclosure should be cleared");
    }

    #[tokio::test]
    async fn test_enclosure_roundtrip() {
        let db = test_db().await;
        let mut article = test_article("podcast", "Episode 1");
        let enclosure = Enclosure {
            url: "https://example.com/ep1.mp3".to_string(),
            mime_type: "audio/mpeg".to_string(),
            length: "52428800".to_string(),
        };
        article.enclosure = Some(enclosure.clone());
        db.upsert_article(&article, FEED_URL).await.unwrap();

        let articles = db.list_articles().await.unwrap();
        assert_eq!(articles[0].enclosure, Some(enclosure));
    }

    #[tokio::test]
    async fn test_missing_enclosure_absent_in_storage_and_json() {
        let db = test_db().await;
        db.upsert_article(&test_article("1", "Plain"), FEED_URL)
            .await
            .unwrap();

        let (url, mime, length): (Option<String>, Option<String>, Option<String>) =
            sqlx::query_as(
                "SELECT enclosure_url, enclosure_type, enclosure_length FROM articles",
            )
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!((url, mime, length), (None, None, None));

        let articles = db.list_articles().await.unwrap();
        assert!(articles[0].enclosure.is_none());

        let json = serde_json::to_value(&articles[0]).unwrap();
        assert!(json.get("enclosure").is_none(), "got {}", json);
    }

    #[tokio::test]
    async fn test_legacy_empty_enclosure_columns_decode_as_none() {
        let db = test_db().await;
        sqlx::query(
            r#"INSERT INTO articles (title, link, description, content, source, pubdate, fetched_at,
                                     enclosure_url, enclosure_type, enclosure_length)
               VALUES ('Old', 'https://example.com/old', '', '', ?, '', '', '', '', '')"#,
        )
        .bind(FEED_URL)
        .execute(&db.pool)
        .await
        .unwrap();

        let articles = db.list_articles().await.unwrap();
        assert_eq!(articles.len(), 1);
        assert!(articles[0].enclosure.is_none());
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_row() {
        let db = test_db().await;
        for i in 0..3 {
            db.upsert_article(&test_article(&i.to_string(), &format!("Article {}", i)), FEED_URL)
                .await
                .unwrap();
        }

        // NULL where text is required
        sqlx::query("UPDATE articles SET title = NULL WHERE link = 'https://example.com/1'")
            .execute(&db.pool)
            .await
            .unwrap();
        // Row written by something else, missing its description
        sqlx::query(
            "INSERT INTO articles (title, link, content, source, pubdate)
             VALUES ('Stray', 'https://example.com/stray', '', '', '')",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        let articles = db.list_articles().await.unwrap();
        let links: Vec<&str> = articles.iter().map(|a| a.link.as_str()).collect();
        assert_eq!(
            links,
            vec!["https://example.com/0", "https://example.com/2"]
        );
    }

    #[tokio::test]
    async fn test_list_empty() {
        let db = test_db().await;
        assert!(db.list_articles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_same_link() {
        let db = test_db().await;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = db.clone();
                tokio::spawn(async move {
                    let article = test_article("shared", &format!("Version {}", i));
                    db.upsert_article(&article, FEED_URL).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let articles = db.list_articles().await.unwrap();
        assert_eq!(articles.len(), 1);
        assert!(articles[0].title.starts_with("Version "));
    }
}
