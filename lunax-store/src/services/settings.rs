//! Settings service
//!
//! Manages the single settings record in the store. Reads always come back
//! fully populated; merges overlay a typed patch in one atomic write.

use crate::config::{SETTINGS, SETTINGS_KEY};
use crate::database::{RecordStore, Settings, SettingsPatch, Snapshot};
use crate::error::Result;
use serde_json::Value;

/// Service for managing application settings
#[derive(Clone)]
pub struct SettingsService {
    store: RecordStore,
}

impl SettingsService {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    /// Current settings; writes and returns the defaults if none are stored
    pub async fn read(&self) -> Result<Settings> {
        match self.store.get(SETTINGS, SETTINGS_KEY).await? {
            Some(value) => Ok(from_stored(value)),
            None => {
                tracing::info!("Settings record not found, writing defaults");
                let defaults = Settings::default();
                self.replace(&defaults).await?;
                Ok(defaults)
            }
        }
    }

    /// Settings as seen by `snapshot`; the defaults when none are stored.
    /// Never writes.
    pub async fn read_in(&self, snapshot: &mut Snapshot<'_>) -> Result<Settings> {
        Ok(snapshot
            .get(SETTINGS, SETTINGS_KEY)
            .await?
            .map(from_stored)
            .unwrap_or_default())
    }

    /// Overlay the present fields of `patch` on the stored settings
    pub async fn merge(&self, patch: SettingsPatch) -> Result<Settings> {
        let written = self
            .store
            .update(SETTINGS, SETTINGS_KEY, move |current| {
                let base = current.map(from_stored).unwrap_or_default();
                Ok(serde_json::to_value(patch.apply(base))?)
            })
            .await?;

        tracing::info!("Settings updated");
        Ok(serde_json::from_value(written)?)
    }

    /// Merge an untyped patch such as the `settings` object of an import.
    ///
    /// A patch that does not fit the settings shape is dropped with a
    /// warning and `None` is returned; nothing is written.
    pub async fn merge_value(&self, value: &Value) -> Result<Option<Settings>> {
        match serde_json::from_value::<SettingsPatch>(value.clone()) {
            Ok(patch) => Ok(Some(self.merge(patch).await?)),
            Err(e) => {
                tracing::warn!("Ignoring ill-typed settings patch: {}", e);
                Ok(None)
            }
        }
    }

    /// Write a full settings record, replacing whatever is stored
    pub async fn replace(&self, settings: &Settings) -> Result<()> {
        self.store
            .put(SETTINGS, Some(SETTINGS_KEY), &serde_json::to_value(settings)?)
            .await?;
        tracing::info!("Settings replaced");
        Ok(())
    }
}

/// Parse a stored record. Missing fields take their defaults; a record
/// that no longer parses at all is read as the defaults.
fn from_stored(value: Value) -> Settings {
    serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::warn!("Stored settings are unreadable, using defaults: {}", e);
        Settings::default()
    })
}
