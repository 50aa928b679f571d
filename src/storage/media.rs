use super::schema::Database;
use super::types::{CompletedMedia, DatabaseError, MediaCursor, MediaFile, MediaFileDbRow};

impl Database {
    // ========================================================================
    // Media Work Queue
    // ========================================================================

    /// Next page of `pending` media files after `cursor`, ordered by
    /// `(created_at, id)`.
    ///
    /// Callers advance the cursor to the last row returned, so a file whose
    /// status write failed is not selected again in the same run.
    pub async fn pending_media_after(
        &self,
        cursor: Option<MediaCursor>,
        limit: usize,
    ) -> Result<Vec<MediaFile>, DatabaseError> {
        let (after_created, after_id) = cursor.unwrap_or((i64::MIN, i64::MIN));
        let sql = format!(
            "SELECT {} FROM media_files \
             WHERE status = 'pending' AND (created_at > ? OR (created_at = ? AND id > ?)) \
             ORDER BY created_at ASC, id ASC LIMIT ?",
            MediaFileDbRow::COLUMNS
        );
        let rows = sqlx::query_as::<_, MediaFileDbRow>(&sql)
            .bind(after_created)
            .bind(after_created)
            .bind(after_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(MediaFileDbRow::into_media_file).collect()
    }

    /// Media files of one article in placeholder order.
    pub async fn media_for_article(&self, article_id: &str) -> Result<Vec<MediaFile>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM media_files WHERE article_id = ? ORDER BY image_order ASC, id ASC",
            MediaFileDbRow::COLUMNS
        );
        let rows = sqlx::query_as::<_, MediaFileDbRow>(&sql)
            .bind(article_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(MediaFileDbRow::into_media_file).collect()
    }

    pub async fn count_pending_media(&self, article_id: &str) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM media_files WHERE article_id = ? AND status = 'pending'",
        )
        .bind(article_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // ========================================================================
    // Media Status Transitions
    // ========================================================================

    /// Record that a download is about to start. Returns the new attempt count.
    pub async fn begin_media_attempt(&self, media_id: i64) -> Result<i64, DatabaseError> {
        let result: Option<(i64,)> = sqlx::query_as(
            "UPDATE media_files SET download_attempts = download_attempts + 1
             WHERE id = ? AND status = 'pending' RETURNING download_attempts",
        )
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(result.map(|(n,)| n).unwrap_or(0))
    }

    /// `pending -> completed`. Returns `false` when the file was not pending.
    pub async fn complete_media(
        &self,
        media_id: i64,
        done: &CompletedMedia,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE media_files
            SET status = 'completed', local_path = ?, file_size = ?, width = ?, height = ?,
                error = NULL
            WHERE id = ? AND status = 'pending'
        "#,
        )
        .bind(&done.local_path)
        .bind(done.file_size)
        .bind(done.width)
        .bind(done.height)
        .bind(media_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `pending -> failed`. Returns `false` when the file was not pending.
    pub async fn fail_media(&self, media_id: i64, error: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE media_files SET status = 'failed', error = ?, local_path = NULL
             WHERE id = ? AND status = 'pending'",
        )
        .bind(error)
        .bind(media_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Promote `processing` articles with no pending media to `ready`.
    ///
    /// Returns the number of articles promoted.
    pub async fn sweep_ready_articles(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE articles SET media_status = 'ready'
            WHERE media_status = 'processing'
              AND NOT EXISTS (
                  SELECT 1 FROM media_files m
                  WHERE m.article_id = articles.article_id AND m.status = 'pending'
              )
        "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
