//! Entries service
//!
//! High-level business logic for journal entries.
//! Handles entry lifecycle and hands out autosave sessions.

use super::autosave::AutosaveSession;
use crate::database::{day_start, Entry, Repository};
use crate::error::{AppError, Result};
use serde_json::Value;
use std::time::Duration;

/// Partial entry update: only the present fields are applied
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub title: Option<String>,
    pub content: Option<Value>,
    pub date_for_entry: Option<i64>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` clears the category
    pub category: Option<Option<String>>,
    pub chapter_path: Option<Vec<String>>,
    pub is_favorite: Option<bool>,
    pub is_locked: Option<bool>,
}

impl EntryUpdate {
    pub fn apply(self, entry: &mut Entry) {
        if let Some(title) = self.title {
            entry.title = title;
        }
        if let Some(content) = self.content {
            entry.content = content;
        }
        if let Some(date) = self.date_for_entry {
            entry.date_for_entry = day_start(date);
        }
        if let Some(tags) = self.tags {
            entry.tags = tags;
        }
        if let Some(category) = self.category {
            entry.category = category;
        }
        if let Some(chapter_path) = self.chapter_path {
            entry.chapter_path = chapter_path;
        }
        if let Some(fav) = self.is_favorite {
            entry.is_favorite = fav;
        }
        if let Some(locked) = self.is_locked {
            entry.is_locked = locked;
        }
    }
}

/// Service for managing entries
#[derive(Clone)]
pub struct EntriesService {
    repo: Repository,
    autosave_interval: Duration,
}

impl EntriesService {
    pub fn new(repo: Repository, autosave_interval: Duration) -> Self {
        Self {
            repo,
            autosave_interval,
        }
    }

    /// Create a new empty entry dated today
    pub async fn create_entry(&self, title: impl Into<String>) -> Result<Entry> {
        self.create_entry_with(title, EntryUpdate::default()).await
    }

    /// Create a new entry with `update` applied before its single write
    pub async fn create_entry_with(
        &self,
        title: impl Into<String>,
        update: EntryUpdate,
    ) -> Result<Entry> {
        let mut entry = Entry::new(title);
        update.apply(&mut entry);
        tracing::info!("Creating new entry: {}", entry.id);

        let entry = self.repo.put_entry(entry).await?;

        tracing::info!("Entry created successfully: {}", entry.id);
        Ok(entry)
    }

    pub async fn get_entry(&self, id: &str) -> Result<Entry> {
        self.repo.require_entry(id).await
    }

    pub async fn update_entry(&self, id: &str, update: EntryUpdate) -> Result<Entry> {
        tracing::debug!("Updating entry: {}", id);

        let entry = self.repo.modify_entry(id, |entry| update.apply(entry)).await?;

        tracing::debug!("Entry updated successfully: {}", entry.id);
        Ok(entry)
    }

    pub async fn toggle_favorite(&self, id: &str) -> Result<Entry> {
        self.repo
            .modify_entry(id, |entry| entry.is_favorite = !entry.is_favorite)
            .await
    }

    pub async fn toggle_locked(&self, id: &str) -> Result<Entry> {
        self.repo
            .modify_entry(id, |entry| entry.is_locked = !entry.is_locked)
            .await
    }

    /// Delete an entry and any of its attachments nothing else references
    pub async fn delete_entry(&self, id: &str) -> Result<()> {
        tracing::info!("Deleting entry: {}", id);

        let released = self
            .repo
            .delete_entry_cascade(id)
            .await?
            .ok_or_else(|| AppError::EntryNotFound(id.to_string()))?;

        tracing::info!(
            "Entry deleted successfully: {} ({} attachments released)",
            id,
            released.len()
        );
        Ok(())
    }

    /// Start an autosave session over the stored entry `id`
    pub async fn open_autosave(&self, id: &str) -> Result<AutosaveSession> {
        let entry = self.repo.require_entry(id).await?;
        Ok(AutosaveSession::start(
            self.repo.clone(),
            entry,
            self.autosave_interval,
        ))
    }
}
