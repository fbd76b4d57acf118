//! Attachments service
//!
//! Handles binary attachments for entries.
//! A blob is stored in the same transaction as the reference that points
//! at it, and removed only once no entry references it.

use crate::config::{ATTACHMENT_ID_PREFIX, FALLBACK_MIME, MAX_ATTACHMENT_NAME_LENGTH};
use crate::database::{new_id, AttachmentBlob, AttachmentKind, AttachmentRef, Repository};
use crate::error::{AppError, Result};

/// Service for managing attachments
#[derive(Clone)]
pub struct AttachmentsService {
    repo: Repository,
}

impl AttachmentsService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Store `data` as a new attachment and append a reference to the entry
    pub async fn add_attachment(
        &self,
        entry_id: &str,
        name: &str,
        mime: &str,
        data: &[u8],
    ) -> Result<AttachmentRef> {
        tracing::info!(
            "Creating attachment: {} for entry: {} (size: {} bytes)",
            name,
            entry_id,
            data.len()
        );

        let mime = if mime.trim().is_empty() {
            FALLBACK_MIME
        } else {
            mime.trim()
        };
        let safe_name = sanitize_filename(name);

        let blob = AttachmentBlob {
            id: new_id(ATTACHMENT_ID_PREFIX),
            mime: mime.to_string(),
            data: data.to_vec(),
        };
        let reference = AttachmentRef {
            id: blob.id.clone(),
            kind: AttachmentKind::from_mime(mime),
            name: (!safe_name.is_empty()).then_some(safe_name),
            mime: blob.mime.clone(),
            size: Some(data.len() as u64),
            thumb_id: None,
            extra: Default::default(),
        };

        // Blob and reference land together or not at all
        self.repo.attach(entry_id, &blob, reference.clone()).await?;

        tracing::info!("Attachment created: {}", reference.id);
        Ok(reference)
    }

    /// Remove a reference from an entry; the blob (and its thumb) go too once
    /// nothing else references them. Returns whether the entry held it.
    pub async fn detach(&self, entry_id: &str, attachment_id: &str) -> Result<bool> {
        let removed = self
            .repo
            .detach_attachment(entry_id, attachment_id)
            .await?
            .is_some();
        if removed {
            tracing::info!("Attachment {} detached from {}", attachment_id, entry_id);
        }
        Ok(removed)
    }

    pub async fn read_attachment(&self, id: &str) -> Result<AttachmentBlob> {
        self.repo
            .get_attachment(id)
            .await?
            .ok_or_else(|| AppError::AttachmentNotFound(id.to_string()))
    }
}

/// Sanitize filename to prevent path traversal attacks
fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| *c != '/' && *c != '\\' && *c != '\0')
        .take(MAX_ATTACHMENT_NAME_LENGTH)
        .collect()
}
