//! Attachment-related commands

use crate::app::AppState;
use crate::config::FALLBACK_MIME;
use crate::database::AttachmentRef;
use crate::error::Result;
use std::path::Path;

/// Attach a file from disk to an entry
pub async fn attach_file(
    state: &AppState,
    entry_id: &str,
    path: &Path,
    mime: Option<String>,
) -> Result<AttachmentRef> {
    let data = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mime = mime.unwrap_or_else(|| guess_mime(path).to_string());

    state
        .attachments_service
        .add_attachment(entry_id, &name, &mime, &data)
        .await
}

/// MIME type from a file extension; covers what the journal usually holds
fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "webm" => "audio/webm",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        _ => FALLBACK_MIME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("photo.JPG")), "image/jpeg");
        assert_eq!(guess_mime(Path::new("voice.ogg")), "audio/ogg");
        assert_eq!(guess_mime(Path::new("notes.md")), "text/plain");
        assert_eq!(guess_mime(Path::new("archive.tar.gz")), FALLBACK_MIME);
        assert_eq!(guess_mime(Path::new("README")), FALLBACK_MIME);
    }
}
