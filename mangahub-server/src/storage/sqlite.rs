//! SQLite backend for the progress store.

use super::{LibraryRow, ProgressRow, ProgressStore};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mangahub_types::ReadingStatus;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-backed store.
///
/// Uses WAL mode for concurrent reads/writes and enforces foreign keys so
/// account deletion cascades into `user_progress`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run the
    /// schema migration.
    pub async fn new(path: &Path) -> StorageResult<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|_| StorageError::InvalidPath {
                    path: dir.to_path_buf(),
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&path.to_string_lossy())
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS manga (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                author TEXT,
                genres TEXT,
                status TEXT,
                total_chapters INTEGER DEFAULT 0,
                description TEXT,
                cover_url TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_progress (
                user_id TEXT NOT NULL,
                manga_id TEXT NOT NULL,
                current_chapter INTEGER DEFAULT 0,
                status TEXT DEFAULT 'plan_to_read',
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, manga_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (manga_id) REFERENCES manga(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_manga_title ON manga(title)",
            "CREATE INDEX IF NOT EXISTS idx_manga_author ON manga(author)",
            "CREATE INDEX IF NOT EXISTS idx_user_progress_user ON user_progress(user_id)",
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(StorageError::Database)?;
        }

        Ok(())
    }

    /// Seed a user row. Accounts are owned by the external account
    /// service; this is the surface it (and test fixtures) write through.
    pub async fn insert_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(())
    }

    /// Seed a catalog row. The catalog is owned by the external manga
    /// service; this is the surface it (and test fixtures) write through.
    pub async fn insert_manga(
        &self,
        id: &str,
        title: &str,
        author: Option<&str>,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO manga (id, title, author)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET title = excluded.title
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(author)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for SqliteStore {
    async fn manga_exists(&self, manga_id: &str) -> StorageResult<Option<String>> {
        let title: Option<String> = sqlx::query_scalar("SELECT title FROM manga WHERE id = ?1")
            .bind(manga_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(title)
    }

    async fn upsert_progress(
        &self,
        user_id: &str,
        manga_id: &str,
        chapter: i64,
        status: Option<ReadingStatus>,
        fallback: ReadingStatus,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_progress (user_id, manga_id, current_chapter, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, manga_id) DO UPDATE SET
                current_chapter = excluded.current_chapter,
                status = COALESCE(?6, status),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(manga_id)
        .bind(chapter)
        .bind(status.unwrap_or(fallback).as_str())
        .bind(now)
        .bind(status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn add_to_library(
        &self,
        user_id: &str,
        manga_id: &str,
        status: ReadingStatus,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_progress (user_id, manga_id, current_chapter, status, updated_at)
            VALUES (?1, ?2, 0, ?3, ?4)
            ON CONFLICT(user_id, manga_id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(manga_id)
        .bind(status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn delete_progress(&self, user_id: &str, manga_id: &str) -> StorageResult<u64> {
        let result = sqlx::query(
            "DELETE FROM user_progress WHERE user_id = ?1 AND manga_id = ?2",
        )
        .bind(user_id)
        .bind(manga_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(result.rows_affected())
    }

    async fn get_progress(
        &self,
        user_id: &str,
        manga_id: &str,
    ) -> StorageResult<Option<ProgressRow>> {
        let row = sqlx::query_as::<_, ProgressRow>(
            r#"
            SELECT user_id, manga_id, current_chapter, status, updated_at
            FROM user_progress
            WHERE user_id = ?1 AND manga_id = ?2
            "#,
        )
        .bind(user_id)
        .bind(manga_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(row)
    }

    async fn list_library(&self, user_id: &str) -> StorageResult<Vec<LibraryRow>> {
        let rows = sqlx::query_as::<_, LibraryRow>(
            r#"
            SELECT m.id AS manga_id, m.title, m.author, m.genres,
                   m.status AS manga_status, m.total_chapters, m.description, m.cover_url,
                   up.current_chapter, up.status AS read_status, up.updated_at
            FROM user_progress up
            JOIN manga m ON up.manga_id = m.id
            WHERE up.user_id = ?1
            ORDER BY up.updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(rows)
    }
}
