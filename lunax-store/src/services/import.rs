//! Merge-import engine
//!
//! Adds the contents of an interchange document to the live store without
//! touching anything already there. Incoming ids that collide get fresh
//! ones, attachment references are rewritten to follow their blobs, and
//! the result commits as two atomic batches: blobs, then entries. Whether
//! an id is taken is decided inside the batch that writes it.

use super::interchange::{decode, decode_data_url, InterchangeDocument};
use super::settings::SettingsService;
use crate::config::{
    ATTACHMENTS, ENTRIES, FALLBACK_MIME, IMPORTED_ATTACHMENT_ID_PREFIX, IMPORTED_ENTRY_ID_PREFIX,
};
use crate::database::{
    day_start, new_id, now_millis, AttachmentBlob, AttachmentKind, Entry, Repository, WriteTxn,
};
use crate::error::{Result, ValidationError};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Entry,
    Blob,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Entry => write!(f, "entry"),
            RecordKind::Blob => write!(f, "blob"),
        }
    }
}

/// An incoming record that was not written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub kind: RecordKind,
    /// Position in the document's array
    pub position: usize,
    pub reason: ValidationError,
}

/// What an import did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported_entries: usize,
    pub imported_blobs: usize,
    /// Whether any written record got an id other than its incoming one
    pub remapped: bool,
    pub settings_applied: bool,
    pub skipped: Vec<SkippedRecord>,
    /// Incoming id to stored id, for entries whose id changed
    pub entry_id_map: BTreeMap<String, String>,
    /// Incoming id to stored id, for blobs whose id changed
    pub blob_id_map: BTreeMap<String, String>,
}

/// Blob as it appears in a file; every field checked by hand
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingBlob {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    mime: Option<String>,
    #[serde(default, alias = "base64")]
    encoded_payload: Option<String>,
}

/// Engine that merges interchange documents into the store
#[derive(Clone)]
pub struct ImportService {
    repo: Repository,
    settings: SettingsService,
}

impl ImportService {
    pub fn new(repo: Repository, settings: SettingsService) -> Self {
        Self { repo, settings }
    }

    /// Read, decode and import a file
    pub async fn import_from_file(&self, path: &Path) -> Result<ImportReport> {
        tracing::info!("Importing from {:?}", path);
        let bytes = tokio::fs::read(path).await?;
        let document = decode(&bytes)?;
        self.import(document).await
    }

    /// Merge `document` into the store
    pub async fn import(&self, document: InterchangeDocument) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        match &document.settings {
            Some(patch @ Value::Object(_)) => {
                report.settings_applied = self.settings.merge_value(patch).await?.is_some();
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                tracing::warn!("Ignoring settings that are not an object: {}", other);
            }
        }

        let blobs = validate_blobs(&document.blobs, &mut report);
        let blob_mimes: HashMap<String, String> = blobs
            .iter()
            .map(|b| (b.id.clone(), b.mime.clone()))
            .collect();
        let entries = validate_entries(&document.entries, &blob_mimes, now_millis(), &mut report);

        // Blobs first, so every reference resolves by the time entries land
        self.commit_blobs(blobs, &mut report).await?;
        self.commit_entries(entries, &mut report).await?;

        report.remapped = report.remapped
            || !report.blob_id_map.is_empty()
            || !report.entry_id_map.is_empty();
        report
            .skipped
            .sort_by_key(|s| (s.kind == RecordKind::Entry, s.position));

        for skipped in &report.skipped {
            tracing::warn!(
                "Skipped {} #{}: {}",
                skipped.kind,
                skipped.position,
                skipped.reason
            );
        }
        tracing::info!(
            "Imported {} entries and {} blobs ({} skipped, remapped: {})",
            report.imported_entries,
            report.imported_blobs,
            report.skipped.len(),
            report.remapped
        );

        Ok(report)
    }

    /// Write blobs as one atomic batch. Collisions are decided inside the
    /// batch's transaction, so a record another writer committed first is
    /// never replaced.
    async fn commit_blobs(&self, blobs: Vec<AttachmentBlob>, report: &mut ImportReport) -> Result<()> {
        if blobs.is_empty() {
            return Ok(());
        }

        let mut txn = self.repo.store().begin_write().await?;
        let mut seen = HashSet::new();

        for mut blob in blobs {
            if !seen.insert(blob.id.clone()) {
                // Repeated inside the document; the first occurrence keeps
                // the id and owns references to it
                report.remapped = true;
                blob.id = new_id(IMPORTED_ATTACHMENT_ID_PREFIX);
            } else if txn.exists(ATTACHMENTS, &blob.id).await? {
                let fresh = new_id(IMPORTED_ATTACHMENT_ID_PREFIX);
                report.blob_id_map.insert(blob.id.clone(), fresh.clone());
                blob.id = fresh;
            }

            txn.put_record(&blob).await?;
            report.imported_blobs += 1;
        }

        txn.commit().await?;
        Ok(())
    }

    /// Write entries as one atomic batch, with references rewritten through
    /// the blob map and checked against what is stored at commit time
    async fn commit_entries(
        &self,
        entries: Vec<(usize, Entry)>,
        report: &mut ImportReport,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut txn = self.repo.store().begin_write().await?;
        let mut seen = HashSet::new();
        let mut written = 0;

        for (position, mut entry) in entries {
            for reference in &mut entry.attachments {
                if let Some(mapped) = report.blob_id_map.get(&reference.id) {
                    reference.id = mapped.clone();
                }
            }

            if let Some(reason) = find_dangling(&mut txn, &entry).await? {
                report.skipped.push(SkippedRecord {
                    kind: RecordKind::Entry,
                    position,
                    reason,
                });
                continue;
            }

            if !seen.insert(entry.id.clone()) {
                report.remapped = true;
                entry.id = new_id(IMPORTED_ENTRY_ID_PREFIX);
            } else if txn.exists(ENTRIES, &entry.id).await? {
                let fresh = new_id(IMPORTED_ENTRY_ID_PREFIX);
                report
                    .entry_id_map
                    .insert(entry.id.clone(), fresh.clone());
                entry.id = fresh;
            }

            txn.put_record(&entry).await?;
            written += 1;
        }

        txn.commit().await?;
        report.imported_entries = written;
        Ok(())
    }
}

/// First reference that does not resolve to a stored blob
async fn find_dangling(txn: &mut WriteTxn<'_>, entry: &Entry) -> Result<Option<ValidationError>> {
    for id in entry.attachment_ids() {
        if !txn.exists(ATTACHMENTS, id).await? {
            return Ok(Some(ValidationError::DanglingAttachment {
                entry: entry.id.clone(),
                attachment: id.to_string(),
            }));
        }
    }
    Ok(None)
}

fn validate_blobs(incoming: &[Value], report: &mut ImportReport) -> Vec<AttachmentBlob> {
    let mut out = Vec::with_capacity(incoming.len());
    for (position, raw) in incoming.iter().enumerate() {
        match validate_blob(raw) {
            Ok(blob) => out.push(blob),
            Err(reason) => report.skipped.push(SkippedRecord {
                kind: RecordKind::Blob,
                position,
                reason,
            }),
        }
    }
    out
}

fn validate_entries(
    incoming: &[Value],
    blob_mimes: &HashMap<String, String>,
    now: i64,
    report: &mut ImportReport,
) -> Vec<(usize, Entry)> {
    let mut out = Vec::with_capacity(incoming.len());
    for (position, raw) in incoming.iter().enumerate() {
        match validate_entry(raw, blob_mimes, now) {
            Ok(entry) => out.push((position, entry)),
            Err(reason) => report.skipped.push(SkippedRecord {
                kind: RecordKind::Entry,
                position,
                reason,
            }),
        }
    }
    out
}

fn validate_blob(raw: &Value) -> std::result::Result<AttachmentBlob, ValidationError> {
    if !raw.is_object() {
        return Err(ValidationError::NotAnObject { record: "blob" });
    }

    let blob: IncomingBlob =
        serde_json::from_value(raw.clone()).map_err(|e| ValidationError::InvalidField {
            record: "blob",
            id: raw.get("id").map(|v| v.to_string()).unwrap_or_default(),
            reason: e.to_string(),
        })?;

    let id = blob
        .id
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::MissingField {
            record: "blob",
            field: "id",
        })?;
    let mime = blob
        .mime
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::MissingField {
            record: "blob",
            field: "mime",
        })?;
    let payload = blob
        .encoded_payload
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::MissingField {
            record: "blob",
            field: "encodedPayload",
        })?;

    let data = decode_data_url(&payload)
        .map_err(|reason| ValidationError::InvalidPayload { id: id.clone(), reason })?;

    Ok(AttachmentBlob { id, mime, data })
}

/// Shape an incoming entry, then parse it as an `Entry`.
///
/// `createdAt` is kept if present and falls back to now, `updatedAt` is
/// always the import time. References carrying only an id get their mime
/// from the incoming blob of that id, and their kind from the mime.
fn validate_entry(
    raw: &Value,
    blob_mimes: &HashMap<String, String>,
    now: i64,
) -> std::result::Result<Entry, ValidationError> {
    let Value::Object(object) = raw else {
        return Err(ValidationError::NotAnObject { record: "entry" });
    };

    let id = match object.get("id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        _ => {
            return Err(ValidationError::MissingField {
                record: "entry",
                field: "id",
            })
        }
    };
    let invalid = |reason: String| ValidationError::InvalidField {
        record: "entry",
        id: id.clone(),
        reason,
    };

    let mut object = object.clone();
    let created_at = match object.get("createdAt") {
        Some(Value::Null) | None => now,
        Some(value) => epoch_millis(value)
            .ok_or_else(|| invalid(format!("createdAt is not epoch milliseconds: {}", value)))?,
    };
    object.insert("createdAt".into(), Value::from(created_at));
    object.insert("updatedAt".into(), Value::from(now));

    let date_for_entry = match object.get("dateForEntry") {
        Some(Value::Null) | None => day_start(created_at),
        Some(value) => epoch_millis(value)
            .ok_or_else(|| invalid(format!("dateForEntry is not epoch milliseconds: {}", value)))?,
    };
    object.insert("dateForEntry".into(), Value::from(date_for_entry));

    if let Some(Value::Array(references)) = object.get_mut("attachments") {
        for reference in references.iter_mut() {
            if let Value::Object(fields) = reference {
                complete_reference(fields, blob_mimes);
            }
        }
    }

    serde_json::from_value(Value::Object(object)).map_err(|e| invalid(e.to_string()))
}

/// Integral numbers as they are; finite fractional ones truncated
fn epoch_millis(value: &Value) -> Option<i64> {
    match value.as_i64() {
        Some(ms) => Some(ms),
        None => value
            .as_f64()
            .filter(|ms| ms.is_finite() && ms.abs() < i64::MAX as f64)
            .map(|ms| ms.trunc() as i64),
    }
}

fn complete_reference(fields: &mut Map<String, Value>, blob_mimes: &HashMap<String, String>) {
    let mime = match fields.get("mime") {
        Some(Value::String(mime)) if !mime.is_empty() => mime.clone(),
        _ => fields
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| blob_mimes.get(id))
            .cloned()
            .unwrap_or_else(|| FALLBACK_MIME.to_string()),
    };

    if matches!(fields.get("kind"), Some(Value::Null) | None) {
        let kind = match AttachmentKind::from_mime(&mime) {
            AttachmentKind::Image => "image",
            AttachmentKind::Audio => "audio",
            AttachmentKind::File => "file",
        };
        fields.insert("kind".into(), Value::from(kind));
    }
    fields.insert("mime".into(), Value::from(mime));
}
