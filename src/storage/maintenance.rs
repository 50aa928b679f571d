use super::schema::Database;
use super::types::{
    CleanupOutcome, ContentStatus, DatabaseError, MediaFileStatus, MediaStatus, StoreStats,
};

impl Database {
    // ========================================================================
    // Retention
    // ========================================================================

    /// Delete articles created before `cutoff` (unix seconds).
    ///
    /// Media rows go with them through the foreign-key cascade. The local
    /// paths of deleted media are returned for the caller to unlink; the
    /// store never touches the filesystem itself.
    pub async fn delete_older_than(&self, cutoff: i64) -> Result<CleanupOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let paths: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT m.local_path FROM media_files m
            JOIN articles a ON a.article_id = m.article_id
            WHERE a.created_at < ? AND m.local_path IS NOT NULL
        "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let media = sqlx::query(
            "DELETE FROM media_files WHERE article_id IN \
             (SELECT article_id FROM articles WHERE created_at < ?)",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let articles = sqlx::query("DELETE FROM articles WHERE created_at < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(CleanupOutcome {
            articles_deleted: articles.rows_affected(),
            media_rows_deleted: media.rows_affected(),
            local_paths: paths.into_iter().map(|(p,)| p).collect(),
        })
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub async fn stats(&self) -> Result<StoreStats, DatabaseError> {
        let mut stats = StoreStats::default();

        let content: Vec<(String, i64)> =
            sqlx::query_as("SELECT content_status, COUNT(*) FROM articles GROUP BY content_status")
                .fetch_all(&self.pool)
                .await?;
        for (status, count) in content {
            stats.articles_total += count;
            match ContentStatus::parse(&status) {
                Some(ContentStatus::Pending) => stats.content_pending = count,
                Some(ContentStatus::Parsed) => stats.content_parsed = count,
                Some(ContentStatus::Failed) => stats.content_failed = count,
                None => {
                    return Err(DatabaseError::InvalidValue {
                        column: "content_status",
                        value: status,
                    })
                }
            }
        }

        let media: Vec<(String, i64)> =
            sqlx::query_as("SELECT media_status, COUNT(*) FROM articles GROUP BY media_status")
                .fetch_all(&self.pool)
                .await?;
        for (status, count) in media {
            match MediaStatus::parse(&status) {
                Some(MediaStatus::None) => stats.media_none = count,
                Some(MediaStatus::Processing) => stats.media_processing = count,
                Some(MediaStatus::Ready) => stats.media_ready = count,
                None => {
                    return Err(DatabaseError::InvalidValue {
                        column: "media_status",
                        value: status,
                    })
                }
            }
        }

        let files: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM media_files GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        for (status, count) in files {
            match MediaFileStatus::parse(&status) {
                Some(MediaFileStatus::Pending) => stats.files_pending = count,
                Some(MediaFileStatus::Completed) => stats.files_completed = count,
                Some(MediaFileStatus::Failed) => stats.files_failed = count,
                None => {
                    return Err(DatabaseError::InvalidValue {
                        column: "status",
                        value: status,
                    })
                }
            }
        }

        let (publishable,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM articles WHERE content_status = 'parsed' AND media_status = 'ready'",
        )
        .fetch_one(&self.pool)
        .await?;
        stats.publishable = publishable;

        Ok(stats)
    }
}
