use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{
    Article, ArticleDbRow, ContentStatus, DatabaseError, MediaStatus, ParsedContent,
};

/// Maximum number of articles to return from any single listing query
const MAX_ARTICLES: i64 = 2000;

impl Database {
    // ========================================================================
    // Article Reads
    // ========================================================================

    pub async fn get_article(&self, article_id: &str) -> Result<Option<Article>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM articles WHERE article_id = ?",
            ArticleDbRow::COLUMNS
        );
        let row = sqlx::query_as::<_, ArticleDbRow>(&sql)
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ArticleDbRow::into_article).transpose()
    }

    /// Ids of `pending` articles, oldest first.
    ///
    /// Ties on `created_at` fall back to insertion order so the queue order
    /// is stable across runs.
    pub async fn pending_article_ids(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<String>, DatabaseError> {
        let limit = limit.map_or(-1, |n| n as i64);
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT article_id FROM articles
            WHERE content_status = 'pending'
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?
        "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Articles ready for the publish adapter: `parsed` with `media_status = ready`.
    pub async fn publishable_articles(&self, limit: i64) -> Result<Vec<Article>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM articles \
             WHERE content_status = 'parsed' AND media_status = 'ready' \
             ORDER BY parsed_at ASC, created_at ASC LIMIT ?",
            ArticleDbRow::COLUMNS
        );
        let rows = sqlx::query_as::<_, ArticleDbRow>(&sql)
            .bind(limit.clamp(1, MAX_ARTICLES))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ArticleDbRow::into_article).collect()
    }

    /// Articles of one source, newest first.
    pub async fn articles_for_source(
        &self,
        source_id: &str,
        limit: i64,
    ) -> Result<Vec<Article>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM articles WHERE source_id = ? ORDER BY created_at DESC LIMIT ?",
            ArticleDbRow::COLUMNS
        );
        let rows = sqlx::query_as::<_, ArticleDbRow>(&sql)
            .bind(source_id)
            .bind(limit.clamp(1, MAX_ARTICLES))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ArticleDbRow::into_article).collect()
    }

    pub async fn count_articles(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ========================================================================
    // Status Transitions
    // ========================================================================

    /// Transition a `pending` article to `parsed` atomically.
    ///
    /// Writes content, resolved URL, parse timestamp, the media rows (in
    /// `pending`, ordered 1..n) and the aggregate media status in one
    /// transaction: `processing` when media rows exist, `ready` otherwise.
    ///
    /// Returns `false` (and writes nothing) when the article is not pending.
    pub async fn mark_parsed(
        &self,
        article_id: &str,
        parsed: &ParsedContent,
    ) -> Result<bool, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let media_status = if parsed.media.is_empty() {
            MediaStatus::Ready
        } else {
            MediaStatus::Processing
        };

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE articles
            SET content = ?, resolved_url = ?, content_status = ?, media_status = ?,
                parsed_at = ?, last_error = NULL
            WHERE article_id = ? AND content_status = 'pending'
        "#,
        )
        .bind(&parsed.content)
        .bind(&parsed.resolved_url)
        .bind(ContentStatus::Parsed.as_str())
        .bind(media_status.as_str())
        .bind(now)
        .bind(article_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if !parsed.media.is_empty() {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO media_files \
                 (article_id, url, media_type, alt_text, caption, image_order, status, created_at) ",
            );
            builder.push_values(parsed.media.iter().enumerate(), |mut b, (i, media)| {
                b.push_bind(article_id)
                    .push_bind(&media.url)
                    .push_bind(media.media_type.as_str())
                    .push_bind(&media.alt_text)
                    .push_bind(&media.caption)
                    .push_bind(i as i64 + 1)
                    .push_bind("pending")
                    .push_bind(now);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Transition a `pending` article to `failed` with a reason.
    ///
    /// Content is never touched. Returns `false` when the article is not pending.
    pub async fn mark_failed(
        &self,
        article_id: &str,
        error: &str,
        resolved_url: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE articles
            SET content_status = ?, last_error = ?, resolved_url = COALESCE(?, resolved_url)
            WHERE article_id = ? AND content_status = 'pending'
        "#,
        )
        .bind(ContentStatus::Failed.as_str())
        .bind(error)
        .bind(resolved_url)
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Explicitly return an article to `pending`, whatever its state.
    ///
    /// Clears content, error, resolved URL and parse time, deletes its media
    /// rows and sets `media_status = none`. Returns the local paths of the
    /// deleted media so the caller can remove the files, or `None` when the
    /// article does not exist.
    pub async fn reset_article(
        &self,
        article_id: &str,
    ) -> Result<Option<Vec<String>>, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let paths: Vec<(String,)> = sqlx::query_as(
            "SELECT local_path FROM media_files WHERE article_id = ? AND local_path IS NOT NULL",
        )
        .bind(article_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM media_files WHERE article_id = ?")
            .bind(article_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            UPDATE articles
            SET content = NULL, resolved_url = NULL, content_status = 'pending',
                media_status = 'none', parsed_at = NULL, last_error = NULL
            WHERE article_id = ?
        "#,
        )
        .bind(article_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(paths.into_iter().map(|(p,)| p).collect()))
    }
}
