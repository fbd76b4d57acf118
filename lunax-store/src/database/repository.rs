//! Repository layer for journal records
//!
//! Typed CRUD over the record store for entries, attachments, thumbs and
//! the search index, plus the read-only list views. Entity invariants that
//! span collections (attachment references resolve, `updatedAt` never goes
//! backwards) are enforced here.

use super::catalog::{
    BY_ATTACHMENT, BY_CATEGORY, BY_DATE, BY_FAVORITE, BY_LOCKED, BY_MIME, BY_TAG, BY_UPDATED,
};
use super::index::{Direction, KeyRange};
use super::models::*;
use super::store::{RecordStore, WriteTxn};
use crate::config::{ATTACHMENTS, ENTRIES, SEARCH_INDEX, SEARCH_INDEX_KEY, THUMBS};
use crate::error::{AppError, Result};

/// Repository for journal records
#[derive(Clone)]
pub struct Repository {
    store: RecordStore,
}

impl Repository {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    // ===== Entries =====

    /// Write an entry.
    ///
    /// Every attachment it references must already be stored. The stored
    /// `createdAt` of an existing entry is kept, `dateForEntry` is truncated
    /// to its day, and `updatedAt` is set to now but never below its
    /// previous value.
    pub async fn put_entry(&self, entry: Entry) -> Result<Entry> {
        let mut txn = self.store.begin_write().await?;
        let written = write_entry(&mut txn, entry).await?;
        txn.commit().await?;

        tracing::debug!("Saved entry: {}", written.id);
        Ok(written)
    }

    /// Apply `f` to the stored entry and write it back in one transaction
    pub async fn modify_entry<F>(&self, id: &str, f: F) -> Result<Entry>
    where
        F: FnOnce(&mut Entry),
    {
        let mut txn = self.store.begin_write().await?;
        let mut entry = read_entry(&mut txn, id).await?;
        f(&mut entry);
        let written = write_entry(&mut txn, entry).await?;
        txn.commit().await?;

        tracing::debug!("Modified entry: {}", id);
        Ok(written)
    }

    /// Write an edited copy of a stored entry.
    ///
    /// The draft's attachment list is ignored and the stored one kept:
    /// references only change through `attach` and `detach_attachment`.
    pub async fn save_draft(&self, mut draft: Entry) -> Result<Entry> {
        let mut txn = self.store.begin_write().await?;
        draft.attachments = read_entry(&mut txn, &draft.id).await?.attachments;
        let written = write_entry(&mut txn, draft).await?;
        txn.commit().await?;
        Ok(written)
    }

    pub async fn get_entry(&self, id: &str) -> Result<Option<Entry>> {
        self.store.get_record(id).await
    }

    /// Get an entry or fail with `EntryNotFound`
    pub async fn require_entry(&self, id: &str) -> Result<Entry> {
        self.get_entry(id)
            .await?
            .ok_or_else(|| AppError::EntryNotFound(id.to_string()))
    }

    pub async fn delete_entry(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete(ENTRIES, id).await?;
        tracing::debug!("Deleted entry: {} (existed: {})", id, removed);
        Ok(removed)
    }

    /// Delete an entry together with the attachments (and their thumbs)
    /// no other entry references. Returns the ids of the attachments that
    /// went with it, or `None` when there was no such entry.
    pub async fn delete_entry_cascade(&self, id: &str) -> Result<Option<Vec<String>>> {
        let mut txn = self.store.begin_write().await?;
        let Some(entry) = txn.get_record::<Entry>(id).await? else {
            return Ok(None);
        };

        txn.delete(ENTRIES, id).await?;
        let mut released = Vec::new();
        for reference in &entry.attachments {
            if release_if_unreferenced(&mut txn, reference).await? {
                released.push(reference.id.clone());
            }
        }
        txn.commit().await?;

        tracing::debug!("Deleted entry: {} with {} attachments", id, released.len());
        Ok(Some(released))
    }

    /// Every entry, ordered by id
    pub async fn list_entries(&self) -> Result<Vec<Entry>> {
        self.store.get_all_records(None, &KeyRange::all()).await
    }

    /// Most recently updated first
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Entry>> {
        let values = self
            .store
            .cursor(ENTRIES, Some(BY_UPDATED), KeyRange::all(), Direction::Prev)?
            .take(limit)
            .await?;

        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(AppError::from))
            .collect()
    }

    /// Entries whose `dateForEntry` lies in `from..=to`, oldest first
    pub async fn list_by_date_range(&self, from: i64, to: i64) -> Result<Vec<Entry>> {
        if from > to {
            return Ok(Vec::new());
        }
        self.store
            .get_all_records(Some(BY_DATE), &KeyRange::bound(from, to))
            .await
    }

    pub async fn list_by_tag(&self, tag: &str) -> Result<Vec<Entry>> {
        self.store
            .get_all_records(Some(BY_TAG), &KeyRange::only(tag))
            .await
    }

    pub async fn list_by_category(&self, category: &str) -> Result<Vec<Entry>> {
        self.store
            .get_all_records(Some(BY_CATEGORY), &KeyRange::only(category))
            .await
    }

    pub async fn list_favorites(&self) -> Result<Vec<Entry>> {
        self.store
            .get_all_records(Some(BY_FAVORITE), &KeyRange::only(true))
            .await
    }

    pub async fn list_locked(&self) -> Result<Vec<Entry>> {
        self.store
            .get_all_records(Some(BY_LOCKED), &KeyRange::only(true))
            .await
    }

    /// Entries holding a reference to `attachment_id`
    pub async fn entries_referencing(&self, attachment_id: &str) -> Result<Vec<Entry>> {
        self.store
            .get_all_records(Some(BY_ATTACHMENT), &KeyRange::only(attachment_id))
            .await
    }

    /// Write entries verbatim as one atomic batch
    pub async fn bulk_put_entries(&self, entries: &[Entry]) -> Result<usize> {
        self.store.put_records(entries).await
    }

    // ===== Attachments =====

    pub async fn put_attachment(&self, blob: &AttachmentBlob) -> Result<()> {
        self.store.put_record(blob).await?;
        tracing::debug!("Saved attachment: {} ({} bytes)", blob.id, blob.data.len());
        Ok(())
    }

    pub async fn get_attachment(&self, id: &str) -> Result<Option<AttachmentBlob>> {
        self.store.get_record(id).await
    }

    pub async fn attachment_exists(&self, id: &str) -> Result<bool> {
        self.store.exists(ATTACHMENTS, id).await
    }

    /// Delete an attachment blob; refused while any entry references it
    pub async fn delete_attachment(&self, id: &str) -> Result<bool> {
        let mut txn = self.store.begin_write().await?;
        let holders = txn
            .keys_in(ENTRIES, BY_ATTACHMENT, &KeyRange::only(id))
            .await?;
        if let Some(entry) = holders.into_iter().next() {
            return Err(AppError::AttachmentInUse {
                attachment: id.to_string(),
                entry,
            });
        }

        let removed = txn.delete(ATTACHMENTS, id).await?;
        txn.commit().await?;

        tracing::debug!("Deleted attachment: {} (existed: {})", id, removed);
        Ok(removed)
    }

    /// Store `blob` and append `reference` to the entry in one transaction
    pub async fn attach(
        &self,
        entry_id: &str,
        blob: &AttachmentBlob,
        reference: AttachmentRef,
    ) -> Result<Entry> {
        let mut txn = self.store.begin_write().await?;
        let mut entry = read_entry(&mut txn, entry_id).await?;
        txn.put_record(blob).await?;
        entry.attachments.push(reference);
        let written = write_entry(&mut txn, entry).await?;
        txn.commit().await?;

        tracing::debug!("Attached {} to entry {}", blob.id, entry_id);
        Ok(written)
    }

    /// Drop one reference from an entry. The blob and its thumb are deleted
    /// in the same transaction once no entry references them. Returns the
    /// removed reference, or `None` if the entry did not hold it.
    pub async fn detach_attachment(
        &self,
        entry_id: &str,
        attachment_id: &str,
    ) -> Result<Option<AttachmentRef>> {
        let mut txn = self.store.begin_write().await?;
        let mut entry = read_entry(&mut txn, entry_id).await?;

        let Some(position) = entry.attachments.iter().position(|a| a.id == attachment_id) else {
            return Ok(None);
        };
        let reference = entry.attachments.remove(position);
        write_entry(&mut txn, entry).await?;
        let released = release_if_unreferenced(&mut txn, &reference).await?;
        txn.commit().await?;

        tracing::debug!(
            "Detached {} from entry {} (blob released: {})",
            attachment_id,
            entry_id,
            released
        );
        Ok(Some(reference))
    }

    pub async fn list_attachments(&self) -> Result<Vec<AttachmentBlob>> {
        self.store.get_all_records(None, &KeyRange::all()).await
    }

    pub async fn list_attachments_by_mime(&self, mime: &str) -> Result<Vec<AttachmentBlob>> {
        self.store
            .get_all_records(Some(BY_MIME), &KeyRange::only(mime))
            .await
    }

    /// Write blobs verbatim as one atomic batch
    pub async fn bulk_put_attachments(&self, blobs: &[AttachmentBlob]) -> Result<usize> {
        self.store.put_records(blobs).await
    }

    // ===== Thumbs =====

    pub async fn put_thumb(&self, thumb: &Thumb) -> Result<()> {
        self.store.put_record(thumb).await?;
        Ok(())
    }

    pub async fn get_thumb(&self, id: &str) -> Result<Option<Thumb>> {
        self.store.get_record(id).await
    }

    pub async fn delete_thumb(&self, id: &str) -> Result<bool> {
        self.store.delete(THUMBS, id).await
    }

    // ===== Search index =====

    /// Replace the stored search index wholesale
    pub async fn save_search_index(&self, payload: SearchPayload) -> Result<()> {
        let record = SearchIndexRecord::new(payload);
        self.store
            .put(
                SEARCH_INDEX,
                Some(SEARCH_INDEX_KEY),
                &serde_json::to_value(&record)?,
            )
            .await?;
        tracing::debug!("Saved search index");
        Ok(())
    }

    pub async fn load_search_index(&self) -> Result<Option<SearchIndexRecord>> {
        match self.store.get(SEARCH_INDEX, SEARCH_INDEX_KEY).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

async fn read_entry(txn: &mut WriteTxn<'_>, id: &str) -> Result<Entry> {
    txn.get_record(id)
        .await?
        .ok_or_else(|| AppError::EntryNotFound(id.to_string()))
}

/// `put_entry` inside an open transaction
async fn write_entry(txn: &mut WriteTxn<'_>, mut entry: Entry) -> Result<Entry> {
    for attachment_id in entry.attachment_ids() {
        if !txn.exists(ATTACHMENTS, attachment_id).await? {
            return Err(AppError::DanglingAttachment {
                entry: entry.id.clone(),
                attachment: attachment_id.to_string(),
            });
        }
    }

    entry.date_for_entry = day_start(entry.date_for_entry);
    let now = now_millis();
    match txn.get_record::<Entry>(&entry.id).await? {
        Some(previous) => {
            entry.created_at = previous.created_at;
            entry.updated_at = now.max(previous.updated_at);
        }
        None => entry.updated_at = now.max(entry.created_at),
    }

    txn.put_record(&entry).await?;
    Ok(entry)
}

/// Delete the blob behind `reference` (and its thumb) if no entry holds it
async fn release_if_unreferenced(txn: &mut WriteTxn<'_>, reference: &AttachmentRef) -> Result<bool> {
    let holders = txn
        .keys_in(ENTRIES, BY_ATTACHMENT, &KeyRange::only(reference.id.as_str()))
        .await?;
    if !holders.is_empty() {
        return Ok(false);
    }

    let removed = txn.delete(ATTACHMENTS, &reference.id).await?;
    if let Some(thumb_id) = &reference.thumb_id {
        txn.delete(THUMBS, thumb_id).await?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{create_memory_pool, open_journal_store};

    async fn create_test_repo() -> Repository {
        let pool = create_memory_pool().await.unwrap();
        Repository::new(open_journal_store(pool).await.unwrap())
    }

    fn blob(id: &str, mime: &str) -> AttachmentBlob {
        AttachmentBlob {
            id: id.to_string(),
            mime: mime.to_string(),
            data: vec![0xde, 0xad, 0xbe, 0xef],
        }
    }

    fn reference(id: &str) -> AttachmentRef {
        AttachmentRef {
            id: id.to_string(),
            kind: AttachmentKind::Image,
            name: None,
            mime: "image/png".to_string(),
            size: Some(4),
            thumb_id: None,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_put_and_get_entry() {
        let repo = create_test_repo().await;

        let entry = Entry::new("Test Entry");
        let saved = repo.put_entry(entry.clone()).await.unwrap();
        assert_eq!(saved.id, entry.id);

        let fetched = repo.require_entry(&entry.id).await.unwrap();
        assert_eq!(fetched.title, "Test Entry");
        assert_eq!(fetched, saved);
    }

    #[tokio::test]
    async fn test_require_missing_entry() {
        let repo = create_test_repo().await;
        assert!(matches!(
            repo.require_entry("nope").await,
            Err(AppError::EntryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_updated_at_never_decreases() {
        let repo = create_test_repo().await;

        let mut entry = Entry::new("Clock");
        let first = repo.put_entry(entry.clone()).await.unwrap();

        // A caller holding a stale or skewed timestamp cannot move it back
        entry.updated_at = 0;
        entry.created_at = 0;
        let second = repo.put_entry(entry).await.unwrap();

        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_date_for_entry_truncated_to_day() {
        let repo = create_test_repo().await;

        let mut entry = Entry::new("Dated");
        entry.date_for_entry = 1_710_085_320_000;
        let saved = repo.put_entry(entry).await.unwrap();
        assert_eq!(saved.date_for_entry, 1_710_028_800_000);
    }

    #[tokio::test]
    async fn test_entry_with_missing_attachment_is_rejected() {
        let repo = create_test_repo().await;

        let mut entry = Entry::new("Dangling");
        entry.attachments.push(reference("a_missing"));

        assert!(matches!(
            repo.put_entry(entry.clone()).await,
            Err(AppError::DanglingAttachment { .. })
        ));
        assert!(repo.get_entry(&entry.id).await.unwrap().is_none());

        repo.put_attachment(&blob("a_missing", "image/png")).await.unwrap();
        repo.put_entry(entry).await.unwrap();
    }

    #[tokio::test]
    async fn test_referenced_attachment_cannot_be_deleted() {
        let repo = create_test_repo().await;

        repo.put_attachment(&blob("a1", "image/png")).await.unwrap();
        let mut entry = Entry::new("With image");
        entry.attachments.push(reference("a1"));
        let entry = repo.put_entry(entry).await.unwrap();

        assert!(matches!(
            repo.delete_attachment("a1").await,
            Err(AppError::AttachmentInUse { .. })
        ));

        repo.delete_entry(&entry.id).await.unwrap();
        assert!(repo.delete_attachment("a1").await.unwrap());
        assert!(repo.get_attachment("a1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_recent_orders_newest_first() {
        let repo = create_test_repo().await;

        let mut ids = Vec::new();
        for i in 0..4 {
            let saved = repo.put_entry(Entry::new(format!("Entry {}", i))).await.unwrap();
            ids.push(saved.id);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let recent = repo.list_recent(3).await.unwrap();
        let recent_ids: Vec<&str> = recent.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(recent_ids, vec![ids[3].as_str(), ids[2].as_str(), ids[1].as_str()]);
    }

    #[tokio::test]
    async fn test_list_by_date_range() {
        let repo = create_test_repo().await;

        let day = 86_400_000;
        for (title, d) in [("third", 30), ("first", 10), ("second", 20), ("late", 40)] {
            let mut entry = Entry::new(title);
            entry.date_for_entry = d * day;
            repo.put_entry(entry).await.unwrap();
        }

        let found = repo.list_by_date_range(10 * day, 30 * day).await.unwrap();
        let titles: Vec<&str> = found.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second", "third"]);

        assert!(repo.list_by_date_range(30 * day, 10 * day).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_by_tag_category_and_flags() {
        let repo = create_test_repo().await;

        let mut a = Entry::new("a");
        a.tags = vec!["sorg".into(), "reflektion".into()];
        a.category = Some("Personligt".into());
        a.is_favorite = true;
        repo.put_entry(a).await.unwrap();

        let mut b = Entry::new("b");
        b.tags = vec!["projekt".into(), "reflektion".into()];
        b.is_locked = true;
        repo.put_entry(b).await.unwrap();

        assert_eq!(repo.list_by_tag("reflektion").await.unwrap().len(), 2);
        assert_eq!(repo.list_by_tag("sorg").await.unwrap()[0].title, "a");
        assert_eq!(repo.list_by_category("Personligt").await.unwrap().len(), 1);
        assert!(repo.list_by_category("Arbete").await.unwrap().is_empty());
        assert_eq!(repo.list_favorites().await.unwrap()[0].title, "a");
        assert_eq!(repo.list_locked().await.unwrap()[0].title, "b");
    }

    #[tokio::test]
    async fn test_attachments_by_mime_and_thumbs() {
        let repo = create_test_repo().await;

        repo.put_attachment(&blob("a1", "image/png")).await.unwrap();
        repo.put_attachment(&blob("a2", "audio/ogg")).await.unwrap();
        repo.put_attachment(&blob("a3", "image/png")).await.unwrap();

        assert_eq!(repo.list_attachments_by_mime("image/png").await.unwrap().len(), 2);
        assert_eq!(repo.list_attachments().await.unwrap().len(), 3);

        let thumb = Thumb(blob("t1", "image/webp"));
        repo.put_thumb(&thumb).await.unwrap();
        assert_eq!(repo.get_thumb("t1").await.unwrap(), Some(thumb));
        assert!(repo.delete_thumb("t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_search_index_is_replaced_wholesale() {
        let repo = create_test_repo().await;

        assert!(repo.load_search_index().await.unwrap().is_none());

        repo.save_search_index(SearchPayload::Text(r#"{"v":1}"#.into()))
            .await
            .unwrap();
        repo.save_search_index(SearchPayload::Bytes { bytes: vec![9, 8, 7] })
            .await
            .unwrap();

        let record = repo.load_search_index().await.unwrap().unwrap();
        assert_eq!(record.id, SEARCH_INDEX_KEY);
        assert_eq!(record.payload, SearchPayload::Bytes { bytes: vec![9, 8, 7] });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_put_and_delete_never_dangle() {
        let repo = create_test_repo().await;

        for round in 0..30 {
            let id = format!("a{}", round);
            repo.put_attachment(&blob(&id, "image/png")).await.unwrap();
            let mut entry = Entry::new("racer");
            entry.attachments.push(reference(&id));

            let writer = {
                let repo = repo.clone();
                tokio::spawn(async move { repo.put_entry(entry).await })
            };
            let deleter = {
                let repo = repo.clone();
                let id = id.clone();
                tokio::spawn(async move { repo.delete_attachment(&id).await })
            };
            let put = writer.await.unwrap();
            let delete = deleter.await.unwrap();

            assert!(put.is_ok() != delete.is_ok(), "round {}: exactly one side wins", round);
        }

        for entry in repo.list_entries().await.unwrap() {
            for id in entry.attachment_ids() {
                assert!(repo.attachment_exists(id).await.unwrap(), "{} dangles", id);
            }
        }
    }

    #[tokio::test]
    async fn test_attach_and_detach_in_one_step() {
        let repo = create_test_repo().await;
        let entry = repo.put_entry(Entry::new("Photos")).await.unwrap();

        let mut with_thumb = reference("a1");
        with_thumb.thumb_id = Some("t1".into());
        repo.put_thumb(&Thumb(blob("t1", "image/webp"))).await.unwrap();

        let attached = repo
            .attach(&entry.id, &blob("a1", "image/png"), with_thumb.clone())
            .await
            .unwrap();
        assert_eq!(attached.attachments, vec![with_thumb.clone()]);

        assert!(matches!(
            repo.attach("e_missing", &blob("a2", "image/png"), reference("a2")).await,
            Err(AppError::EntryNotFound(_))
        ));
        assert!(!repo.attachment_exists("a2").await.unwrap());

        assert_eq!(
            repo.detach_attachment(&entry.id, "a1").await.unwrap(),
            Some(with_thumb)
        );
        assert!(repo.detach_attachment(&entry.id, "a1").await.unwrap().is_none());
        assert!(!repo.attachment_exists("a1").await.unwrap());
        assert!(repo.get_thumb("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_draft_keeps_stored_attachments() {
        let repo = create_test_repo().await;
        let entry = repo.put_entry(Entry::new("Draft")).await.unwrap();
        let stale = entry.clone();

        repo.attach(&entry.id, &blob("a1", "image/png"), reference("a1"))
            .await
            .unwrap();

        let mut draft = stale;
        draft.title = "Edited".into();
        let saved = repo.save_draft(draft).await.unwrap();

        assert_eq!(saved.title, "Edited");
        assert_eq!(saved.attachments, vec![reference("a1")]);

        repo.delete_entry(&entry.id).await.unwrap();
        assert!(matches!(
            repo.save_draft(saved).await,
            Err(AppError::EntryNotFound(_))
        ));
        assert!(repo.get_entry(&entry.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_modify_entry() {
        let repo = create_test_repo().await;
        let entry = repo.put_entry(Entry::new("Flags")).await.unwrap();

        let modified = repo
            .modify_entry(&entry.id, |e| e.is_favorite = true)
            .await
            .unwrap();
        assert!(modified.is_favorite);
        assert!(repo.require_entry(&entry.id).await.unwrap().is_favorite);

        assert!(matches!(
            repo.modify_entry("e_missing", |e| e.is_favorite = true).await,
            Err(AppError::EntryNotFound(_))
        ));
    }
}
