use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, NewArticle, SourceHealth, SourceRecord};

/// Rows per multi-row INSERT (7 binds each, well under SQLite's 999 limit).
const BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Source Registry
    // ========================================================================

    /// Sync the configured sources into the registry.
    ///
    /// Inserts new sources and updates name/feed_url/category/enabled of
    /// existing ones. Health columns are left untouched.
    pub async fn sync_sources(&self, sources: &[SourceRecord]) -> Result<(), DatabaseError> {
        if sources.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in sources.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT INTO sources (id, name, feed_url, category, enabled) ");

            builder.push_values(chunk, |mut b, source| {
                b.push_bind(&source.id)
                    .push_bind(&source.name)
                    .push_bind(&source.feed_url)
                    .push_bind(&source.category)
                    .push_bind(source.enabled);
            });

            builder.push(
                " ON CONFLICT(id) DO UPDATE SET name = excluded.name, feed_url = excluded.feed_url, \
                 category = excluded.category, enabled = excluded.enabled",
            );

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All registered sources with their health bookkeeping, ordered by id.
    pub async fn list_sources(&self) -> Result<Vec<SourceHealth>, DatabaseError> {
        let rows = sqlx::query_as::<_, SourceHealth>(
            r#"
            SELECT id, name, feed_url, category, enabled, last_checked_at,
                   consecutive_errors, last_error, total_articles
            FROM sources
            ORDER BY id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_source(&self, source_id: &str) -> Result<Option<SourceHealth>, DatabaseError> {
        let row = sqlx::query_as::<_, SourceHealth>(
            r#"
            SELECT id, name, feed_url, category, enabled, last_checked_at,
                   consecutive_errors, last_error, total_articles
            FROM sources
            WHERE id = ?
        "#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ========================================================================
    // Discovery Bookkeeping
    // ========================================================================

    /// Complete a source poll atomically: insert new articles, reset the
    /// error streak, bump `total_articles` and `last_checked_at`.
    ///
    /// Articles whose URL (or derived id) already exists are ignored, so
    /// repeating a poll of an unchanged feed inserts nothing.
    ///
    /// # Returns
    ///
    /// The number of newly inserted articles.
    pub async fn complete_source_discovery(
        &self,
        source_id: &str,
        articles: &[NewArticle],
    ) -> Result<usize, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut total_inserted: usize = 0;

        for chunk in articles.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO articles \
                 (article_id, source_id, url, title, description, published_at, created_at) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(&article.article_id)
                    .push_bind(source_id)
                    .push_bind(&article.url)
                    .push_bind(&article.title)
                    .push_bind(&article.description)
                    .push_bind(article.published_at)
                    .push_bind(article.discovered_at);
            });

            builder.build().execute(&mut *tx).await?;

            // changes() counts only rows actually inserted
            let changes: (i64,) = sqlx::query_as("SELECT changes()")
                .fetch_one(&mut *tx)
                .await?;
            total_inserted += changes.0 as usize;
        }

        sqlx::query(
            "UPDATE sources SET last_checked_at = ?, consecutive_errors = 0, last_error = NULL, \
             total_articles = total_articles + ? WHERE id = ?",
        )
        .bind(now)
        .bind(total_inserted as i64)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// Record a failed poll. Returns the new consecutive error count.
    pub async fn record_source_failure(
        &self,
        source_id: &str,
        error: &str,
    ) -> Result<i64, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let result: Option<(i64,)> = sqlx::query_as(
            "UPDATE sources SET consecutive_errors = consecutive_errors + 1, last_error = ?, \
             last_checked_at = ? WHERE id = ? RETURNING consecutive_errors",
        )
        .bind(error)
        .bind(now)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(result.map(|(n,)| n).unwrap_or(0))
    }

    /// Clear a source's error streak without polling it.
    pub async fn reset_source_errors(&self, source_id: &str) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE sources SET consecutive_errors = 0, last_error = NULL WHERE id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, NewArticle, SourceRecord};
    use crate::util::{article_id_for, canonicalize_url};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn source(id: &str) -> SourceRecord {
        SourceRecord {
            id: id.to_string(),
            name: format!("Source {id}"),
            feed_url: format!("https://{id}.example.com/rss"),
            category: "news".to_string(),
            enabled: true,
        }
    }

    fn entry(path: &str, discovered_at: i64) -> NewArticle {
        let url = canonicalize_url(&format!("https://example.com/{path}")).unwrap();
        NewArticle {
            article_id: article_id_for(&url),
            url,
            title: format!("Story {path}"),
            description: None,
            published_at: Some(1_704_067_200),
            discovered_at,
        }
    }

    #[tokio::test]
    async fn test_sync_sources_insert_and_update() {
        let db = test_db().await;
        db.sync_sources(&[source("alpha"), source("beta")]).await.unwrap();

        let mut renamed = source("alpha");
        renamed.name = "Alpha Renamed".to_string();
        renamed.enabled = false;
        db.sync_sources(&[renamed]).await.unwrap();

        let sources = db.list_sources().await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "Alpha Renamed");
        assert!(!sources[0].enabled);
        assert!(sources[1].enabled);
    }

    #[tokio::test]
    async fn test_sync_sources_preserves_health() {
        let db = test_db().await;
        db.sync_sources(&[source("alpha")]).await.unwrap();
        db.record_source_failure("alpha", "timeout").await.unwrap();
        db.sync_sources(&[source("alpha")]).await.unwrap();

        let health = db.get_source("alpha").await.unwrap().unwrap();
        assert_eq!(health.consecutive_errors, 1);
        assert_eq!(health.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_complete_discovery_counts_only_new() {
        let db = test_db().await;
        db.sync_sources(&[source("alpha")]).await.unwrap();

        let first = db
            .complete_source_discovery("alpha", &[entry("a", 1), entry("b", 2)])
            .await
            .unwrap();
        assert_eq!(first, 2);

        let second = db
            .complete_source_discovery("alpha", &[entry("a", 3), entry("b", 4), entry("c", 5)])
            .await
            .unwrap();
        assert_eq!(second, 1);

        let health = db.get_source("alpha").await.unwrap().unwrap();
        assert_eq!(health.total_articles, 3);
        assert!(health.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_urls_within_one_batch() {
        let db = test_db().await;
        db.sync_sources(&[source("alpha")]).await.unwrap();

        let inserted = db
            .complete_source_discovery("alpha", &[entry("same", 1), entry("same", 2)])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn test_large_batch_chunking() {
        let db = test_db().await;
        db.sync_sources(&[source("alpha")]).await.unwrap();

        let entries: Vec<NewArticle> = (0..120).map(|i| entry(&format!("p{i}"), i)).collect();
        let inserted = db.complete_source_discovery("alpha", &entries).await.unwrap();
        assert_eq!(inserted, 120);
    }

    #[tokio::test]
    async fn test_failure_streak_and_reset() {
        let db = test_db().await;
        db.sync_sources(&[source("alpha")]).await.unwrap();

        assert_eq!(db.record_source_failure("alpha", "e1").await.unwrap(), 1);
        assert_eq!(db.record_source_failure("alpha", "e2").await.unwrap(), 2);

        db.complete_source_discovery("alpha", &[]).await.unwrap();
        let health = db.get_source("alpha").await.unwrap().unwrap();
        assert_eq!(health.consecutive_errors, 0);
        assert!(health.last_error.is_none());

        db.record_source_failure("alpha", "e3").await.unwrap();
        db.reset_source_errors("alpha").await.unwrap();
        let health = db.get_source("alpha").await.unwrap().unwrap();
        assert_eq!(health.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn test_failure_on_unknown_source() {
        let db = test_db().await;
        assert_eq!(db.record_source_failure("ghost", "x").await.unwrap(), 0);
    }
}
