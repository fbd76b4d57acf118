//! Database models
//!
//! Rust structs for every record the journal stores. Field names are
//! camelCase on the wire so exports stay readable by the web client.

use super::store::Record;
use crate::config::{
    ATTACHMENTS, ENTRIES, ENTRY_ID_PREFIX, SEARCH_INDEX_KEY, THUMBS,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

const DAY_MS: i64 = 86_400_000;

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Truncate an epoch-millisecond timestamp to the start of its UTC day
pub fn day_start(ms: i64) -> i64 {
    ms.div_euclid(DAY_MS) * DAY_MS
}

/// `<prefix>_<uuid>`
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4())
}

/// The editor's empty document: one empty paragraph
pub fn empty_document() -> Value {
    json!({
        "type": "doc",
        "content": [{"type": "paragraph", "content": [{"type": "text", "text": ""}]}]
    })
}

/// A journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Editor document tree, stored and exported without inspection
    #[serde(default = "empty_document")]
    pub content: Value,
    pub created_at: i64,
    pub updated_at: i64,
    /// User-chosen day, as the epoch-ms start of that day
    pub date_for_entry: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub chapter_path: Vec<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    /// Fields this version does not know about, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entry {
    /// A fresh, empty entry dated today
    pub fn new(title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: new_id(ENTRY_ID_PREFIX),
            title: title.into(),
            content: empty_document(),
            created_at: now,
            updated_at: now,
            date_for_entry: day_start(now),
            tags: Vec::new(),
            category: None,
            chapter_path: Vec::new(),
            is_favorite: false,
            is_locked: false,
            attachments: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn attachment_ids(&self) -> impl Iterator<Item = &str> {
        self.attachments.iter().map(|a| a.id.as_str())
    }
}

impl Record for Entry {
    const COLLECTION: &'static str = ENTRIES;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Audio,
    File,
}

impl AttachmentKind {
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            AttachmentKind::Image
        } else if mime.starts_with("audio/") {
            AttachmentKind::Audio
        } else {
            AttachmentKind::File
        }
    }
}

/// Reference from an entry to a stored attachment blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub id: String,
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Binary attachment payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentBlob {
    pub id: String,
    pub mime: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Record for AttachmentBlob {
    const COLLECTION: &'static str = ATTACHMENTS;
}

/// Thumbnail payload; same shape as an attachment, kept apart and never
/// integrity-checked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Thumb(pub AttachmentBlob);

impl Record for Thumb {
    const COLLECTION: &'static str = THUMBS;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeKey {
    Light,
    #[default]
    Dark,
    Parchment,
    Obsidian,
    Forest,
    Midnight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSize {
    Sm,
    #[default]
    Md,
    Lg,
}

/// Opt-in third-party keys; absent unless the user adds them
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
}

/// Application settings; a single record under `SETTINGS_KEY`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub theme: ThemeKey,
    pub font_body: String,
    pub font_heading: String,
    pub line_height: f64,
    pub text_size: TextSize,
    pub lock_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_keys: Option<ApiKeys>,
    pub high_contrast: bool,
    pub reduce_motion: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: ThemeKey::Dark,
            font_body: "Inter".to_string(),
            font_heading: "Merriweather".to_string(),
            line_height: 1.7,
            text_size: TextSize::Md,
            lock_enabled: false,
            lock_hint: None,
            api_keys: None,
            high_contrast: false,
            reduce_motion: false,
        }
    }
}

/// Partial settings: only the present fields are applied
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<ThemeKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_size: Option<TextSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_keys: Option<ApiKeys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_contrast: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_motion: Option<bool>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == SettingsPatch::default()
    }

    /// Overlay the present fields on `base`
    pub fn apply(self, mut base: Settings) -> Settings {
        if let Some(v) = self.theme {
            base.theme = v;
        }
        if let Some(v) = self.font_body {
            base.font_body = v;
        }
        if let Some(v) = self.font_heading {
            base.font_heading = v;
        }
        if let Some(v) = self.line_height {
            base.line_height = v;
        }
        if let Some(v) = self.text_size {
            base.text_size = v;
        }
        if let Some(v) = self.lock_enabled {
            base.lock_enabled = v;
        }
        if let Some(v) = self.lock_hint {
            base.lock_hint = Some(v);
        }
        if let Some(v) = self.api_keys {
            base.api_keys = Some(v);
        }
        if let Some(v) = self.high_contrast {
            base.high_contrast = v;
        }
        if let Some(v) = self.reduce_motion {
            base.reduce_motion = v;
        }
        base
    }
}

impl From<Settings> for SettingsPatch {
    fn from(s: Settings) -> Self {
        Self {
            theme: Some(s.theme),
            font_body: Some(s.font_body),
            font_heading: Some(s.font_heading),
            line_height: Some(s.line_height),
            text_size: Some(s.text_size),
            lock_enabled: Some(s.lock_enabled),
            lock_hint: s.lock_hint,
            api_keys: s.api_keys,
            high_contrast: Some(s.high_contrast),
            reduce_motion: Some(s.reduce_motion),
        }
    }
}

/// Serialized search index, produced and consumed outside the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchPayload {
    Text(String),
    Bytes {
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchIndexRecord {
    pub id: String,
    pub payload: SearchPayload,
}

impl SearchIndexRecord {
    pub fn new(payload: SearchPayload) -> Self {
        Self {
            id: SEARCH_INDEX_KEY.to_string(),
            payload,
        }
    }
}

/// Binary fields are stored inside JSON records as standard base64
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
