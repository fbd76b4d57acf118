//! Application configuration
//!
//! Central location for constants shared across the store, plus the runtime
//! `Config` resolved from defaults and `LUNAX_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

// ===== Collections =====

pub const ENTRIES: &str = "entries";
pub const ATTACHMENTS: &str = "attachments";
pub const THUMBS: &str = "thumbs";
pub const SETTINGS: &str = "settings";
pub const SEARCH_INDEX: &str = "search_index";

/// Fixed key of the single settings record
pub const SETTINGS_KEY: &str = "settings";

/// Fixed key of the single search index record
pub const SEARCH_INDEX_KEY: &str = "minisearch";

// ===== Interchange =====

/// The only interchange version this build reads and writes
pub const FORMAT_VERSION: u32 = 1;

/// Prefix of generated export filenames (`lunax-YYYYMMDD-HHMM.json`)
pub const EXPORT_FILE_PREFIX: &str = "lunax";

pub const EXPORT_FILE_EXTENSION: &str = "json";

/// MIME type assumed when a data URL carries none
pub const FALLBACK_MIME: &str = "application/octet-stream";

// ===== Identifiers =====

pub const ENTRY_ID_PREFIX: &str = "e";
pub const ATTACHMENT_ID_PREFIX: &str = "a";
pub const IMPORTED_ENTRY_ID_PREFIX: &str = "imp_e";
pub const IMPORTED_ATTACHMENT_ID_PREFIX: &str = "imp_a";

// ===== Autosave =====

/// Default autosave tick in milliseconds
pub const DEFAULT_AUTO_SAVE_DELAY_MS: u32 = 2_000;

/// Minimum auto-save delay in milliseconds.
/// Values below this cause excessive disk I/O.
pub const MIN_AUTO_SAVE_DELAY_MS: u32 = 100;

/// Maximum auto-save delay in milliseconds (5 minutes).
/// Values above this risk data loss on unexpected shutdown.
pub const MAX_AUTO_SAVE_DELAY_MS: u32 = 300_000;

// ===== Cursors =====

/// Rows fetched per round trip while a cursor walks an index
pub const CURSOR_PAGE_SIZE: u32 = 64;

/// Default number of entries returned by `list_recent`
pub const DEFAULT_RECENT_LIMIT: usize = 50;

// ===== Attachments =====

/// Longest attachment display name kept after sanitizing
pub const MAX_ATTACHMENT_NAME_LENGTH: usize = 255;

/// Environment variable prefix
const ENV_PREFIX: &str = "LUNAX";

/// Database file name inside the data directory
const DB_FILE_NAME: &str = "lunax.sqlite";

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the database and default export location
    pub data_dir: PathBuf,
    /// Autosave tick in milliseconds, always within the allowed bounds
    pub auto_save_delay_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            auto_save_delay_ms: DEFAULT_AUTO_SAVE_DELAY_MS,
        }
    }
}

impl Config {
    /// Defaults with `LUNAX_DATA_DIR` / `LUNAX_AUTOSAVE_MS` applied on top
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// A configuration rooted at an explicit directory (tests, `--data-dir`)
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            if !val.is_empty() {
                self.data_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var(format!("{}_AUTOSAVE_MS", ENV_PREFIX)) {
            match val.parse::<u32>() {
                Ok(ms) => self.auto_save_delay_ms = clamp_auto_save_delay(ms),
                Err(_) => tracing::warn!("Ignoring invalid {}_AUTOSAVE_MS: {}", ENV_PREFIX, val),
            }
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.auto_save_delay_ms))
    }
}

/// Keep an autosave delay inside `MIN_AUTO_SAVE_DELAY_MS..=MAX_AUTO_SAVE_DELAY_MS`
pub fn clamp_auto_save_delay(ms: u32) -> u32 {
    ms.clamp(MIN_AUTO_SAVE_DELAY_MS, MAX_AUTO_SAVE_DELAY_MS)
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lunax")
}
