//! Storage layer: the narrow database contract the sync core commits
//! through.
//!
//! The relational store owns three tables (`users`, `manga`,
//! `user_progress`); the core only ever touches `user_progress` rows and
//! reads `manga` titles. Accounts and the catalog are written by the
//! external HTTP surface through the same pool.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mangahub_types::ReadingStatus;

/// One `user_progress` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProgressRow {
    /// Owning user.
    pub user_id: String,
    /// Target manga.
    pub manga_id: String,
    /// Chapter position, >= 0.
    pub current_chapter: i64,
    /// Reading status.
    pub status: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// One row of `user_progress` joined with `manga`, newest first.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LibraryRow {
    /// Manga id.
    pub manga_id: String,
    /// Manga title.
    pub title: String,
    /// Author, when the catalog knows it.
    pub author: Option<String>,
    /// Comma-separated genres.
    pub genres: Option<String>,
    /// Publication status of the manga itself.
    pub manga_status: Option<String>,
    /// Total chapter count, when known.
    pub total_chapters: Option<i64>,
    /// Catalog description.
    pub description: Option<String>,
    /// Cover image URL.
    pub cover_url: Option<String>,
    /// The user's chapter position.
    pub current_chapter: i64,
    /// The user's reading status.
    pub read_status: String,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// The narrow contract the session server and the bridge commit through.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Whether the manga exists in the catalog; returns its title when it
    /// does.
    async fn manga_exists(&self, manga_id: &str) -> StorageResult<Option<String>>;

    /// Upsert a progress row. Inserts with `status.unwrap_or(fallback)`;
    /// on conflict updates `current_chapter`, `updated_at`, and `status`
    /// only when a new status was supplied.
    async fn upsert_progress(
        &self,
        user_id: &str,
        manga_id: &str,
        chapter: i64,
        status: Option<ReadingStatus>,
        fallback: ReadingStatus,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Put a manga into the library. Inserts with `current_chapter = 0`;
    /// re-adding an existing entry updates status and `updated_at` without
    /// resetting the chapter position.
    async fn add_to_library(
        &self,
        user_id: &str,
        manga_id: &str,
        status: ReadingStatus,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Delete a progress row. Returns the number of rows affected.
    async fn delete_progress(&self, user_id: &str, manga_id: &str) -> StorageResult<u64>;

    /// Fetch a single progress row.
    async fn get_progress(
        &self,
        user_id: &str,
        manga_id: &str,
    ) -> StorageResult<Option<ProgressRow>>;

    /// The user's library joined with the catalog, ordered by
    /// `updated_at DESC`.
    async fn list_library(&self, user_id: &str) -> StorageResult<Vec<LibraryRow>>;
}
