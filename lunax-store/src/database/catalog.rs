//! Collection and index declarations
//!
//! Pure declaration: which collections exist, where their primary key
//! lives and which secondary indexes `RecordStore` keeps up to date.
//! Adding a collection or index here is picked up on the next open;
//! removing one never drops stored data.

use crate::config::{ATTACHMENTS, ENTRIES, SEARCH_INDEX, SETTINGS, THUMBS};

/// A secondary index over one key path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    /// Dotted path into the stored JSON value
    pub key_path: &'static str,
    pub unique: bool,
    /// Index every element of an array value separately
    pub multi_entry: bool,
}

impl IndexDef {
    pub const fn new(name: &'static str, key_path: &'static str) -> Self {
        Self {
            name,
            key_path,
            unique: false,
            multi_entry: false,
        }
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub const fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }
}

/// One named collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDef {
    pub name: &'static str,
    /// Field holding the primary key; `None` means keys are passed explicitly
    pub key_path: Option<&'static str>,
    pub indexes: Vec<IndexDef>,
}

impl CollectionDef {
    pub fn keyed(name: &'static str, key_path: &'static str) -> Self {
        Self {
            name,
            key_path: Some(key_path),
            indexes: Vec::new(),
        }
    }

    pub fn out_of_line(name: &'static str) -> Self {
        Self {
            name,
            key_path: None,
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// Every collection a store knows about
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    collections: Vec<CollectionDef>,
}

impl Catalog {
    pub fn new(collections: Vec<CollectionDef>) -> Self {
        Self { collections }
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionDef> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn collections(&self) -> impl Iterator<Item = &CollectionDef> {
        self.collections.iter()
    }
}

pub const BY_DATE: &str = "by_date";
pub const BY_UPDATED: &str = "by_updated";
pub const BY_CATEGORY: &str = "by_category";
pub const BY_TAG: &str = "by_tag";
pub const BY_FAVORITE: &str = "by_favorite";
pub const BY_LOCKED: &str = "by_locked";
pub const BY_ATTACHMENT: &str = "by_attachment";
pub const BY_MIME: &str = "by_mime";

/// The journal's collections
pub fn journal_catalog() -> Catalog {
    Catalog::new(vec![
        CollectionDef::keyed(ENTRIES, "id")
            .with_index(IndexDef::new(BY_DATE, "dateForEntry"))
            .with_index(IndexDef::new(BY_UPDATED, "updatedAt"))
            .with_index(IndexDef::new(BY_CATEGORY, "category"))
            .with_index(IndexDef::new(BY_TAG, "tags").multi_entry())
            .with_index(IndexDef::new(BY_FAVORITE, "isFavorite"))
            .with_index(IndexDef::new(BY_LOCKED, "isLocked"))
            .with_index(IndexDef::new(BY_ATTACHMENT, "attachments.id").multi_entry()),
        CollectionDef::keyed(ATTACHMENTS, "id").with_index(IndexDef::new(BY_MIME, "mime")),
        CollectionDef::keyed(THUMBS, "id"),
        CollectionDef::out_of_line(SETTINGS),
        CollectionDef::out_of_line(SEARCH_INDEX),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_catalog_shape() {
        let catalog = journal_catalog();

        let entries = catalog.collection(ENTRIES).unwrap();
        assert_eq!(entries.key_path, Some("id"));
        assert!(entries.index(BY_TAG).unwrap().multi_entry);
        assert!(!entries.index(BY_DATE).unwrap().multi_entry);
        assert_eq!(entries.index(BY_ATTACHMENT).unwrap().key_path, "attachments.id");

        assert_eq!(catalog.collection(SETTINGS).unwrap().key_path, None);
        assert!(catalog.collection(THUMBS).unwrap().indexes.is_empty());
        assert!(catalog.collection("missing").is_none());
        assert_eq!(catalog.collections().count(), 5);
    }
}
