//! Autosave session
//!
//! Holds one in-memory draft of an entry. Edits only mark the draft dirty;
//! a background tick writes it once per interval, so a burst of edits costs
//! a single store write. Flushes are serialized per session.
//!
//! Attachment references belong to the stored entry, not the draft: every
//! flush keeps the stored list and copies it back into the draft, so
//! attaching or detaching while a session is open is never undone.

use crate::database::{Entry, Repository};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

struct Draft {
    entry: Entry,
    dirty: bool,
}

struct Shared {
    repo: Repository,
    draft: Mutex<Draft>,
    /// Held for the whole of a flush
    save_lock: Mutex<()>,
    shutdown: Notify,
}

impl Shared {
    /// Write the draft if it is dirty. Returns whether a write happened.
    async fn flush(&self) -> Result<bool> {
        let _saving = self.save_lock.lock().await;

        let snapshot = {
            let mut draft = self.draft.lock().await;
            if !draft.dirty {
                return Ok(false);
            }
            draft.dirty = false;
            draft.entry.clone()
        };

        match self.repo.save_draft(snapshot).await {
            Ok(saved) => {
                let mut draft = self.draft.lock().await;
                draft.entry.created_at = saved.created_at;
                draft.entry.updated_at = saved.updated_at;
                draft.entry.date_for_entry = saved.date_for_entry;
                draft.entry.attachments = saved.attachments;
                tracing::debug!("Autosaved entry: {}", saved.id);
                Ok(true)
            }
            Err(e) => {
                // Edits made while the write was in flight are still pending
                self.draft.lock().await.dirty = true;
                Err(e)
            }
        }
    }
}

/// A live autosave session; dropping it stops the ticker without a final flush
pub struct AutosaveSession {
    shared: Arc<Shared>,
    ticker: Option<JoinHandle<()>>,
}

impl AutosaveSession {
    /// Start ticking every `interval` over `entry`
    pub fn start(repo: Repository, entry: Entry, interval: Duration) -> Self {
        tracing::debug!("Opening autosave session for {} every {:?}", entry.id, interval);

        let shared = Arc::new(Shared {
            repo,
            draft: Mutex::new(Draft {
                entry,
                dirty: false,
            }),
            save_lock: Mutex::new(()),
            shutdown: Notify::new(),
        });

        let ticker = tokio::spawn(run_ticker(shared.clone(), interval));

        Self {
            shared,
            ticker: Some(ticker),
        }
    }

    /// Apply an edit to the draft and mark it dirty
    pub async fn edit<F>(&self, f: F)
    where
        F: FnOnce(&mut Entry),
    {
        let mut draft = self.shared.draft.lock().await;
        f(&mut draft.entry);
        draft.dirty = true;
    }

    /// A copy of the current draft
    pub async fn draft(&self) -> Entry {
        self.shared.draft.lock().await.entry.clone()
    }

    pub async fn is_dirty(&self) -> bool {
        self.shared.draft.lock().await.dirty
    }

    /// Flush pending edits now instead of waiting for the next tick
    pub async fn save_now(&self) -> Result<bool> {
        self.shared.flush().await
    }

    /// Stop ticking, flush what is pending and return the final draft
    pub async fn close(mut self) -> Result<Entry> {
        self.stop_ticker().await;
        self.shared.flush().await?;
        Ok(self.draft().await)
    }

    async fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            self.shared.shutdown.notify_one();
            if let Err(e) = ticker.await {
                tracing::warn!("Autosave ticker ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for AutosaveSession {
    fn drop(&mut self) {
        if self.ticker.is_some() {
            self.shared.shutdown.notify_one();
        }
    }
}

async fn run_ticker(shared: Arc<Shared>, interval: Duration) {
    let mut ticks = time::interval_at(Instant::now() + interval, interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if let Err(e) = shared.flush().await {
                    tracing::warn!("Autosave failed, will retry next tick: {}", e);
                }
            }
            _ = shared.shutdown.notified() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{
        create_memory_pool, open_journal_store, AttachmentBlob, AttachmentKind, AttachmentRef,
    };
    use crate::error::AppError;

    async fn create_test_repo() -> Repository {
        let pool = create_memory_pool().await.unwrap();
        Repository::new(open_journal_store(pool).await.unwrap())
    }

    #[tokio::test]
    async fn test_edits_are_coalesced_into_one_tick() {
        let repo = create_test_repo().await;
        let entry = repo.put_entry(Entry::new("draft")).await.unwrap();

        let session = AutosaveSession::start(repo.clone(), entry.clone(), Duration::from_millis(40));
        for i in 0..5 {
            session.edit(|e| e.title = format!("draft {}", i)).await;
        }
        assert!(session.is_dirty().await);

        // Nothing is written before the tick
        assert_eq!(repo.require_entry(&entry.id).await.unwrap().title, "draft");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!session.is_dirty().await);
        assert_eq!(repo.require_entry(&entry.id).await.unwrap().title, "draft 4");

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_now_and_close_flush() {
        let repo = create_test_repo().await;
        let entry = repo.put_entry(Entry::new("draft")).await.unwrap();

        let session = AutosaveSession::start(repo.clone(), entry.clone(), Duration::from_secs(60));

        assert!(!session.save_now().await.unwrap());

        session.edit(|e| e.tags.push("kväll".into())).await;
        assert!(session.save_now().await.unwrap());
        assert_eq!(repo.require_entry(&entry.id).await.unwrap().tags, vec!["kväll"]);

        session.edit(|e| e.title = "final".into()).await;
        let closed = session.close().await.unwrap();
        assert_eq!(closed.title, "final");
        assert_eq!(repo.require_entry(&entry.id).await.unwrap().title, "final");
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_draft_dirty() {
        let repo = create_test_repo().await;
        let entry = repo.put_entry(Entry::new("draft")).await.unwrap();

        let session = AutosaveSession::start(repo.clone(), entry.clone(), Duration::from_secs(60));
        repo.delete_entry(&entry.id).await.unwrap();
        session.edit(|e| e.title = "orphaned".into()).await;

        assert!(matches!(
            session.save_now().await,
            Err(AppError::EntryNotFound(_))
        ));
        assert!(session.is_dirty().await);
        assert!(repo.get_entry(&entry.id).await.unwrap().is_none());

        repo.put_entry(entry.clone()).await.unwrap();
        assert!(session.save_now().await.unwrap());
        assert_eq!(repo.require_entry(&entry.id).await.unwrap().title, "orphaned");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_attachments_changed_during_session_survive_flush() {
        let repo = create_test_repo().await;
        let entry = repo.put_entry(Entry::new("draft")).await.unwrap();
        let blob = |id: &str| AttachmentBlob {
            id: id.into(),
            mime: "text/plain".into(),
            data: vec![1],
        };
        let reference = |id: &str| AttachmentRef {
            id: id.into(),
            kind: AttachmentKind::File,
            name: None,
            mime: "text/plain".into(),
            size: Some(1),
            thumb_id: None,
            extra: Default::default(),
        };
        repo.attach(&entry.id, &blob("a_old"), reference("a_old"))
            .await
            .unwrap();

        let session = AutosaveSession::start(
            repo.clone(),
            repo.require_entry(&entry.id).await.unwrap(),
            Duration::from_secs(60),
        );

        // Another writer swaps the attachments under the open session
        repo.detach_attachment(&entry.id, "a_old").await.unwrap();
        repo.attach(&entry.id, &blob("a_new"), reference("a_new"))
            .await
            .unwrap();

        session.edit(|e| e.title = "edited".into()).await;
        assert!(session.save_now().await.unwrap());

        let stored = repo.require_entry(&entry.id).await.unwrap();
        assert_eq!(stored.title, "edited");
        assert_eq!(stored.attachments, vec![reference("a_new")]);
        assert_eq!(session.draft().await.attachments, vec![reference("a_new")]);
        assert!(!repo.attachment_exists("a_old").await.unwrap());

        session.close().await.unwrap();
    }
}
