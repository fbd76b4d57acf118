//! Interchange service
//!
//! Whole-journal export to a single portable JSON document and parsing it
//! back. Attachment bytes travel as `data:<mime>;base64,<payload>` strings.
//! Entries and blobs stay untyped in a decoded document; the import engine
//! validates them one record at a time.

use super::settings::SettingsService;
use crate::config::{EXPORT_FILE_EXTENSION, EXPORT_FILE_PREFIX, FORMAT_VERSION};
use crate::database::{AttachmentBlob, Entry, KeyRange, Repository};
use crate::error::{AppError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Local, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;

/// A parsed interchange file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterchangeDocument {
    #[serde(alias = "lunaxVersion")]
    pub format_version: u32,
    #[serde(default)]
    pub exported_at: String,
    #[serde(default)]
    pub settings: Option<Value>,
    pub entries: Vec<Value>,
    pub blobs: Vec<Value>,
    /// Top-level fields this version does not know about
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One exported attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterchangeBlob {
    pub id: String,
    pub mime: String,
    #[serde(alias = "base64")]
    pub encoded_payload: String,
}

impl From<&AttachmentBlob> for InterchangeBlob {
    fn from(blob: &AttachmentBlob) -> Self {
        Self {
            id: blob.id.clone(),
            mime: blob.mime.clone(),
            encoded_payload: encode_data_url(&blob.mime, &blob.data),
        }
    }
}

/// Service producing exports of the live store
#[derive(Clone)]
pub struct InterchangeService {
    repo: Repository,
    settings: SettingsService,
}

impl InterchangeService {
    pub fn new(repo: Repository, settings: SettingsService) -> Self {
        Self { repo, settings }
    }

    /// Every entry, every attachment blob and the settings, read from one
    /// consistent view of the store
    pub async fn export(&self) -> Result<InterchangeDocument> {
        tracing::info!("Exporting journal");

        let mut snapshot = self.repo.store().begin_read().await?;
        let settings = self.settings.read_in(&mut snapshot).await?;
        let entries: Vec<Entry> = snapshot.get_all_records(None, &KeyRange::all()).await?;
        let attachments: Vec<AttachmentBlob> =
            snapshot.get_all_records(None, &KeyRange::all()).await?;
        snapshot.close().await?;

        let entries = entries
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let blobs = attachments
            .iter()
            .map(|blob| serde_json::to_value(InterchangeBlob::from(blob)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::info!(
            "Exported {} entries and {} blobs",
            entries.len(),
            blobs.len()
        );

        Ok(InterchangeDocument {
            format_version: FORMAT_VERSION,
            exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            settings: Some(serde_json::to_value(settings)?),
            entries,
            blobs,
            extra: Map::new(),
        })
    }

    /// Export into `dir`, returning the path written.
    ///
    /// The file is written under a temporary name and renamed into place,
    /// so a reader never sees a half-written export.
    pub async fn export_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).await?;

        let document = self.export().await?;
        let (bytes, filename) = encode(&document)?;
        let target = unused_path(dir, &filename).await?;

        let temp_path = dir.join(format!(".{}.tmp", filename));
        fs::write(&temp_path, &bytes).await?;
        if let Err(e) = fs::rename(&temp_path, &target).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::info!("Export written: {:?} ({} bytes)", target, bytes.len());
        Ok(target)
    }
}

/// Serialize a document as indented JSON and name it after the current
/// local time
pub fn encode(document: &InterchangeDocument) -> Result<(Vec<u8>, String)> {
    let bytes = serde_json::to_vec_pretty(document)?;
    Ok((bytes, export_filename(Local::now().naive_local())))
}

/// `lunax-YYYYMMDD-HHMM.json`
pub fn export_filename(at: NaiveDateTime) -> String {
    format!(
        "{}-{}.{}",
        EXPORT_FILE_PREFIX,
        at.format("%Y%m%d-%H%M"),
        EXPORT_FILE_EXTENSION
    )
}

/// Parse and structurally validate an interchange file
pub fn decode(bytes: &[u8]) -> Result<InterchangeDocument> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| AppError::Format(format!("not well-formed JSON: {}", e)))?;

    let Value::Object(object) = &value else {
        return Err(AppError::Format("top level is not an object".to_string()));
    };

    let version = object
        .get("formatVersion")
        .or_else(|| object.get("lunaxVersion"));
    match version {
        Some(v) if v.as_u64() == Some(u64::from(FORMAT_VERSION)) => {}
        Some(v) => {
            return Err(AppError::Version {
                found: v.to_string(),
                expected: FORMAT_VERSION,
            })
        }
        None => {
            return Err(AppError::Version {
                found: "none".to_string(),
                expected: FORMAT_VERSION,
            })
        }
    }

    for field in ["entries", "blobs"] {
        match object.get(field) {
            Some(Value::Array(_)) => {}
            Some(_) => return Err(AppError::Format(format!("'{}' is not an array", field))),
            None => return Err(AppError::Format(format!("'{}' is missing", field))),
        }
    }

    serde_json::from_value(value).map_err(|e| AppError::Format(e.to_string()))
}

/// `data:<mime>;base64,<payload>`
pub fn encode_data_url(mime: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(data))
}

/// Bytes of a `data:` URL, or of a bare base64 string.
///
/// Data URLs without `;base64` carry percent-encoded text.
pub fn decode_data_url(url: &str) -> std::result::Result<Vec<u8>, String> {
    let Some(rest) = url.strip_prefix("data:") else {
        return STANDARD.decode(url.trim()).map_err(|e| e.to_string());
    };

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| "data URL has no ',' separator".to_string())?;

    if header.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        STANDARD.decode(payload.trim()).map_err(|e| e.to_string())
    } else {
        percent_decode(payload)
    }
}

fn percent_decode(text: &str) -> std::result::Result<Vec<u8>, String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = text
                .get(i + 1..i + 3)
                .ok_or_else(|| "truncated percent escape".to_string())?;
            let byte = u8::from_str_radix(hex, 16).map_err(|e| e.to_string())?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// `dir/filename`, or `dir/<stem>-N.<ext>` when that is taken
async fn unused_path(dir: &Path, filename: &str) -> Result<PathBuf> {
    let candidate = dir.join(filename);
    if !fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let stem = filename
        .strip_suffix(&format!(".{}", EXPORT_FILE_EXTENSION))
        .unwrap_or(filename);
    let mut n = 2;
    loop {
        let candidate = dir.join(format!("{}-{}.{}", stem, n, EXPORT_FILE_EXTENSION));
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{
        create_memory_pool, create_pool, open_journal_store, AttachmentKind, AttachmentRef,
    };
    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_test_service() -> (InterchangeService, Repository) {
        let pool = create_memory_pool().await.unwrap();
        let store = open_journal_store(pool).await.unwrap();
        let repo = Repository::new(store.clone());
        (
            InterchangeService::new(repo.clone(), SettingsService::new(store)),
            repo,
        )
    }

    #[test]
    fn test_export_filename() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(9, 7, 59)
            .unwrap();
        assert_eq!(export_filename(at), "lunax-20240305-0907.json");
    }

    #[test]
    fn test_data_url_round_trip() {
        let data = vec![0u8, 1, 2, 254, 255];
        let url = encode_data_url("image/png", &data);
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(decode_data_url(&url).unwrap(), data);
    }

    #[test]
    fn test_data_url_variants() {
        assert_eq!(decode_data_url("aGVq").unwrap(), b"hej");
        assert_eq!(decode_data_url("data:;base64,aGVq").unwrap(), b"hej");
        assert_eq!(
            decode_data_url("data:text/plain;charset=utf-8,h%C3%A4j").unwrap(),
            "häj".as_bytes()
        );
        assert!(decode_data_url("data:text/plain;base64").is_err());
        assert!(decode_data_url("data:image/png;base64,@@@").is_err());
        assert!(decode_data_url("data:,%4").is_err());
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert!(matches!(decode(b"{not json"), Err(AppError::Format(_))));
        assert!(matches!(decode(b"[1, 2]"), Err(AppError::Format(_))));
        assert!(matches!(
            decode(br#"{"formatVersion": 1, "entries": {}, "blobs": []}"#),
            Err(AppError::Format(_))
        ));
        assert!(matches!(
            decode(br#"{"formatVersion": 1, "blobs": []}"#),
            Err(AppError::Format(_))
        ));
    }

    #[test]
    fn test_decode_rejects_other_versions() {
        for doc in [
            r#"{"formatVersion": 2, "entries": [], "blobs": []}"#,
            r#"{"formatVersion": "1", "entries": [], "blobs": []}"#,
            r#"{"entries": [], "blobs": []}"#,
        ] {
            assert!(matches!(
                decode(doc.as_bytes()),
                Err(AppError::Version { expected: 1, .. })
            ));
        }
    }

    #[test]
    fn test_decode_accepts_web_client_files() {
        let doc = decode(
            br#"{
                "lunaxVersion": 1,
                "exportedAt": "2024-03-05T09:07:59.000Z",
                "settings": null,
                "entries": [{"id": "e1"}],
                "blobs": [{"id": "a1", "mime": "image/png", "base64": "data:image/png;base64,AAE="}],
                "device": "phone"
            }"#,
        )
        .unwrap();

        assert_eq!(doc.format_version, 1);
        assert!(doc.settings.is_none());
        assert_eq!(doc.extra["device"], "phone");

        let blob: InterchangeBlob = serde_json::from_value(doc.blobs[0].clone()).unwrap();
        assert_eq!(blob.encoded_payload, "data:image/png;base64,AAE=");
    }

    #[tokio::test]
    async fn test_export_encode_decode_round_trip() {
        let (service, repo) = create_test_service().await;

        repo.put_attachment(&AttachmentBlob {
            id: "a1".into(),
            mime: "audio/ogg".into(),
            data: (0..=255).collect(),
        })
        .await
        .unwrap();
        let mut entry = Entry::new("Round trip");
        entry.extra.insert("mood".into(), json!("calm"));
        repo.put_entry(entry).await.unwrap();

        let exported = service.export().await.unwrap();
        assert_eq!(exported.format_version, FORMAT_VERSION);
        assert_eq!(exported.entries.len(), 1);
        assert_eq!(exported.blobs.len(), 1);

        let (bytes, filename) = encode(&exported).unwrap();
        assert!(filename.starts_with("lunax-") && filename.ends_with(".json"));

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, exported);
        assert_eq!(decoded.entries[0]["mood"], "calm");

        let blob: InterchangeBlob = serde_json::from_value(decoded.blobs[0].clone()).unwrap();
        assert_eq!(
            decode_data_url(&blob.encoded_payload).unwrap(),
            (0..=255).collect::<Vec<u8>>()
        );
    }

    #[test]
    fn test_encode_is_indented() {
        let (bytes, _) = encode(&InterchangeDocument {
            format_version: FORMAT_VERSION,
            exported_at: String::new(),
            settings: None,
            entries: vec![json!({"id": "e1"})],
            blobs: vec![],
            extra: Map::new(),
        })
        .unwrap();

        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("{\n  \"formatVersion\": 1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_export_is_consistent_under_writes() {
        let temp_dir = TempDir::new().unwrap();
        let pool = create_pool(&temp_dir.path().join("journal.sqlite"))
            .await
            .unwrap();
        let store = open_journal_store(pool).await.unwrap();
        let repo = Repository::new(store.clone());
        let service = InterchangeService::new(repo.clone(), SettingsService::new(store));

        let writer = tokio::spawn({
            let repo = repo.clone();
            async move {
                for i in 0..40 {
                    let entry = Entry::new(format!("entry {}", i));
                    let id = entry.id.clone();
                    repo.put_entry(entry).await.unwrap();

                    let blob = AttachmentBlob {
                        id: format!("a{}", i),
                        mime: "image/png".into(),
                        data: vec![i as u8],
                    };
                    let reference = AttachmentRef {
                        id: blob.id.clone(),
                        kind: AttachmentKind::Image,
                        name: None,
                        mime: blob.mime.clone(),
                        size: Some(1),
                        thumb_id: None,
                        extra: Map::new(),
                    };
                    repo.attach(&id, &blob, reference).await.unwrap();
                    if i % 2 == 0 {
                        repo.delete_entry_cascade(&id).await.unwrap();
                    }
                }
            }
        });

        while !writer.is_finished() {
            let exported = service.export().await.unwrap();
            let blob_ids: Vec<&str> = exported
                .blobs
                .iter()
                .filter_map(|b| b["id"].as_str())
                .collect();
            for entry in &exported.entries {
                for reference in entry["attachments"].as_array().unwrap() {
                    assert!(blob_ids.contains(&reference["id"].as_str().unwrap()));
                }
            }
        }
        writer.await.unwrap();

        let exported = service.export().await.unwrap();
        assert_eq!(exported.entries.len(), 20);
        assert_eq!(exported.blobs.len(), 20);
    }

    #[tokio::test]
    async fn test_export_to_dir_never_overwrites() {
        let (service, _repo) = create_test_service().await;
        let temp_dir = TempDir::new().unwrap();

        let first = service.export_to_dir(temp_dir.path()).await.unwrap();
        let second = service.export_to_dir(temp_dir.path()).await.unwrap();
        assert_ne!(first, second);

        let mut names: Vec<String> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));

        let decoded = decode(&std::fs::read(&first).unwrap()).unwrap();
        assert_eq!(decoded.settings.unwrap()["theme"], "dark");
    }
}
