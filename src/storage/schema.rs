use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the article store.
///
/// Cheap to clone. Every operation acquires a pooled connection for the
/// duration of one statement or one transaction only, so callers never hold
/// a connection across an external network call.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory store (used by tests).
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
                    }
                }
            }
        }

        // busy_timeout lets writers wait out short lock contention instead of
        // failing with SQLITE_BUSY; foreign_keys is per connection.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| match e {
            sqlx::Error::Database(_) => {
                let error_string = e.to_string().to_lowercase();
                if error_string.contains("database is locked")
                    || error_string.contains("database table is locked")
                {
                    DatabaseError::InstanceLocked
                } else {
                    DatabaseError::Migration(e.to_string())
                }
            }
            other => DatabaseError::Migration(other.to_string()),
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                feed_url TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT 'other',
                enabled INTEGER NOT NULL DEFAULT 1,
                last_checked_at INTEGER,
                consecutive_errors INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                total_articles INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // No foreign key to sources: articles outlive sources removed from config
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                article_id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                resolved_url TEXT,
                title TEXT NOT NULL,
                description TEXT,
                published_at INTEGER,
                content TEXT,
                content_status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (content_status IN ('pending', 'parsed', 'failed')),
                media_status TEXT NOT NULL DEFAULT 'none'
                    CHECK (media_status IN ('none', 'processing', 'ready')),
                created_at INTEGER NOT NULL,
                parsed_at INTEGER,
                last_error TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS media_files (
                id INTEGER PRIMARY KEY,
                article_id TEXT NOT NULL REFERENCES articles(article_id) ON DELETE CASCADE,
                url TEXT NOT NULL,
                local_path TEXT,
                file_size INTEGER,
                width INTEGER,
                height INTEGER,
                media_type TEXT NOT NULL DEFAULT 'image',
                alt_text TEXT,
                caption TEXT,
                image_order INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'completed', 'failed')),
                download_attempts INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE(article_id, url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Extraction queue: pending articles, oldest first
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_status_created ON articles(content_status, created_at)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_media_status ON articles(media_status)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_created ON articles(created_at)")
            .execute(&mut *tx)
            .await?;
        // Media queue keyset: (created_at, id) over pending rows
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_media_pending ON media_files(status, created_at, id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_media_article ON media_files(article_id)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}
