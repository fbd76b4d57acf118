//! Generic record store
//!
//! Named collections of JSON records keyed by string, with secondary
//! indexes declared in a `Catalog` and kept current on every write.
//! Every write runs in one SQLite transaction behind a store-wide write
//! gate, so batches never interleave and a failed batch leaves nothing
//! behind. Readers see WAL snapshots and never observe a partial batch.

use super::catalog::{Catalog, CollectionDef, IndexDef};
use super::index::{extract_keys, resolve_path, Direction, IndexKey, KeyRange};
use super::schema::initialize_database;
use crate::config::CURSOR_PAGE_SIZE;
use crate::error::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row, Transaction};
use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// A type stored in one collection of the journal catalog
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;
}

/// Handle to an opened store; cheap to clone
#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
    catalog: Arc<Catalog>,
    write_gate: Arc<Mutex<()>>,
    created: Arc<Vec<String>>,
}

impl RecordStore {
    /// Open the store over a pool: run migrations, then register any
    /// collection or index in `catalog` that the database does not know yet.
    ///
    /// New indexes are back-filled from existing records. Nothing that is
    /// already stored is dropped or renamed, so opening twice is harmless.
    pub async fn open(pool: SqlitePool, catalog: Catalog) -> Result<Self> {
        initialize_database(&pool).await?;

        let mut created = Vec::new();
        let mut tx = pool.begin().await?;

        for def in catalog.collections() {
            if register_collection(&mut tx, def).await? {
                tracing::info!("Created collection '{}'", def.name);
                created.push(def.name.to_string());
            }

            for index in &def.indexes {
                if register_index(&mut tx, def, index).await? {
                    tracing::info!("Created index '{}' on '{}'", index.name, def.name);
                }
            }
        }

        tx.commit().await?;

        Ok(Self {
            pool,
            catalog: Arc::new(catalog),
            write_gate: Arc::new(Mutex::new(())),
            created: Arc::new(created),
        })
    }

    /// Whether this open created `collection` (it did not exist before)
    pub fn newly_created(&self, collection: &str) -> bool {
        self.created.iter().any(|c| c == collection)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn collection_def(&self, collection: &str) -> Result<&CollectionDef> {
        self.catalog
            .collection(collection)
            .ok_or_else(|| AppError::UnknownCollection(collection.to_string()))
    }

    fn index_def(&self, collection: &str, index: &str) -> Result<&IndexDef> {
        self.collection_def(collection)?
            .index(index)
            .ok_or_else(|| AppError::UnknownIndex {
                collection: collection.to_string(),
                index: index.to_string(),
            })
    }

    /// Start a write transaction.
    ///
    /// The store's write gate is held until the transaction commits or is
    /// dropped, so whatever was checked through it still holds when its
    /// writes land. Dropping without `commit` rolls back.
    pub async fn begin_write(&self) -> Result<WriteTxn<'_>> {
        let gate = self.write_gate.lock().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTxn {
            store: self,
            tx,
            _gate: gate,
        })
    }

    /// Start a read snapshot. Every read through it sees the store as it
    /// was at the snapshot's first read, whatever commits meanwhile.
    pub async fn begin_read(&self) -> Result<Snapshot<'_>> {
        let tx = self.pool.begin().await?;
        Ok(Snapshot { store: self, tx })
    }

    /// Insert or replace one record. Returns the key it was stored under.
    ///
    /// In-line keyed collections read the key from the value; `key` may be
    /// given but must agree. Out-of-line collections require `key`.
    pub async fn put(&self, collection: &str, key: Option<&str>, value: &Value) -> Result<String> {
        let mut txn = self.begin_write().await?;
        let key = txn.put(collection, key, value).await?;
        txn.commit().await?;

        tracing::debug!("Put {}/{}", collection, key);
        Ok(key)
    }

    /// Insert or replace many in-line keyed records as one atomic unit.
    ///
    /// Records are written in the order given. Any failure rolls the whole
    /// batch back.
    pub async fn put_many(&self, collection: &str, values: &[Value]) -> Result<usize> {
        let def = self.collection_def(collection)?;
        if values.is_empty() {
            return Ok(0);
        }

        // Every key is checked before the gate is taken
        for value in values {
            resolve_key(def, None, value)?;
        }

        let mut txn = self.begin_write().await?;
        for value in values {
            txn.put(collection, None, value).await?;
        }
        txn.commit().await?;

        tracing::debug!("Put {} records into {} in one batch", values.len(), collection);
        Ok(values.len())
    }

    /// Atomic read-modify-write of a single record
    pub async fn update<F>(&self, collection: &str, key: &str, f: F) -> Result<Value>
    where
        F: FnOnce(Option<Value>) -> Result<Value>,
    {
        let mut txn = self.begin_write().await?;
        let current = txn.get(collection, key).await?;
        let next = f(current)?;
        txn.put(collection, Some(key), &next).await?;
        txn.commit().await?;

        tracing::debug!("Updated {}/{}", collection, key);
        Ok(next)
    }

    pub async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        self.collection_def(collection)?;
        let mut conn = self.pool.acquire().await?;
        read_value(&mut conn, collection, key).await
    }

    pub async fn exists(&self, collection: &str, key: &str) -> Result<bool> {
        self.collection_def(collection)?;
        let mut conn = self.pool.acquire().await?;
        record_exists(&mut conn, collection, key).await
    }

    /// Delete one record and its index entries. Returns whether it existed.
    pub async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let mut txn = self.begin_write().await?;
        let removed = txn.delete(collection, key).await?;
        txn.commit().await?;

        tracing::debug!("Deleted {}/{} (existed: {})", collection, key, removed);
        Ok(removed)
    }

    /// All records in `range`, ordered by `index` (or by primary key)
    pub async fn get_all(
        &self,
        collection: &str,
        index: Option<&str>,
        range: &KeyRange,
    ) -> Result<Vec<Value>> {
        let mut qb = self.select_builder(collection, index, range)?;
        push_order(&mut qb, index.is_some(), Direction::Next);

        let rows = qb.build().fetch_all(&self.pool).await?;
        decode_values(&rows)
    }

    pub async fn count(
        &self,
        collection: &str,
        index: Option<&str>,
        range: &KeyRange,
    ) -> Result<u64> {
        let mut qb = match index {
            Some(index) => {
                self.index_def(collection, index)?;
                let mut qb = QueryBuilder::<Sqlite>::new(
                    "SELECT COUNT(*) FROM index_entries ie WHERE ie.collection = ",
                );
                qb.push_bind(collection.to_string());
                qb.push(" AND ie.index_name = ");
                qb.push_bind(index.to_string());
                qb
            }
            None => {
                self.collection_def(collection)?;
                let mut qb = QueryBuilder::<Sqlite>::new(
                    "SELECT COUNT(*) FROM records r WHERE r.collection = ",
                );
                qb.push_bind(collection.to_string());
                qb
            }
        };
        push_range(&mut qb, index.is_some(), range)?;

        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    /// Ordered iteration over `range`, fetched a page at a time
    pub fn cursor(
        &self,
        collection: &str,
        index: Option<&str>,
        range: KeyRange,
        direction: Direction,
    ) -> Result<Cursor> {
        match index {
            Some(index) => {
                self.index_def(collection, index)?;
            }
            None => {
                self.collection_def(collection)?;
            }
        }

        Ok(Cursor {
            store: self.clone(),
            collection: collection.to_string(),
            index: index.map(str::to_string),
            range,
            direction,
            position: None,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    fn select_builder(
        &self,
        collection: &str,
        index: Option<&str>,
        range: &KeyRange,
    ) -> Result<QueryBuilder<'static, Sqlite>> {
        let mut qb = match index {
            Some(index) => {
                self.index_def(collection, index)?;
                let mut qb = QueryBuilder::<Sqlite>::new(
                    "SELECT ie.index_key AS index_key, ie.record_key AS record_key, r.value AS value \
                     FROM index_entries ie \
                     JOIN records r ON r.collection = ie.collection AND r.key = ie.record_key \
                     WHERE ie.collection = ",
                );
                qb.push_bind(collection.to_string());
                qb.push(" AND ie.index_name = ");
                qb.push_bind(index.to_string());
                qb
            }
            None => {
                self.collection_def(collection)?;
                let mut qb = QueryBuilder::<Sqlite>::new(
                    "SELECT r.key AS record_key, r.value AS value FROM records r WHERE r.collection = ",
                );
                qb.push_bind(collection.to_string());
                qb
            }
        };
        push_range(&mut qb, index.is_some(), range)?;
        Ok(qb)
    }

    // ===== Typed access =====

    pub async fn put_record<T: Record>(&self, record: &T) -> Result<String> {
        let value = serde_json::to_value(record)?;
        self.put(T::COLLECTION, None, &value).await
    }

    pub async fn put_records<T: Record>(&self, records: &[T]) -> Result<usize> {
        let values = records
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.put_many(T::COLLECTION, &values).await
    }

    pub async fn get_record<T: Record>(&self, key: &str) -> Result<Option<T>> {
        match self.get(T::COLLECTION, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn get_all_records<T: Record>(
        &self,
        index: Option<&str>,
        range: &KeyRange,
    ) -> Result<Vec<T>> {
        into_records(self.get_all(T::COLLECTION, index, range).await?)
    }
}

/// A write transaction holding the store's write gate
pub struct WriteTxn<'a> {
    store: &'a RecordStore,
    tx: Transaction<'static, Sqlite>,
    // Released after `tx`, so a rollback finishes before the next writer
    _gate: MutexGuard<'a, ()>,
}

impl<'a> WriteTxn<'a> {
    pub async fn get(&mut self, collection: &str, key: &str) -> Result<Option<Value>> {
        self.store.collection_def(collection)?;
        read_value(&mut self.tx, collection, key).await
    }

    pub async fn exists(&mut self, collection: &str, key: &str) -> Result<bool> {
        self.store.collection_def(collection)?;
        record_exists(&mut self.tx, collection, key).await
    }

    /// Primary keys of the records whose `index` keys fall in `range`
    pub async fn keys_in(
        &mut self,
        collection: &str,
        index: &str,
        range: &KeyRange,
    ) -> Result<Vec<String>> {
        self.store.index_def(collection, index)?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT DISTINCT ie.record_key FROM index_entries ie WHERE ie.collection = ",
        );
        qb.push_bind(collection.to_string());
        qb.push(" AND ie.index_name = ");
        qb.push_bind(index.to_string());
        push_range(&mut qb, true, range)?;
        qb.push(" ORDER BY ie.record_key");

        let keys: Vec<String> = qb.build_query_scalar().fetch_all(&mut *self.tx).await?;
        Ok(keys)
    }

    pub async fn put(&mut self, collection: &str, key: Option<&str>, value: &Value) -> Result<String> {
        let def = self.store.collection_def(collection)?;
        let key = resolve_key(def, key, value)?;
        write_record(&mut self.tx, def, &key, value).await?;
        Ok(key)
    }

    pub async fn delete(&mut self, collection: &str, key: &str) -> Result<bool> {
        self.store.collection_def(collection)?;
        clear_index_entries(&mut self.tx, collection, key).await?;
        let removed = sqlx::query("DELETE FROM records WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    pub async fn get_record<T: Record>(&mut self, key: &str) -> Result<Option<T>> {
        match self.get(T::COLLECTION, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn put_record<T: Record>(&mut self, record: &T) -> Result<String> {
        let value = serde_json::to_value(record)?;
        self.put(T::COLLECTION, None, &value).await
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// A consistent read-only view of the store
pub struct Snapshot<'a> {
    store: &'a RecordStore,
    tx: Transaction<'static, Sqlite>,
}

impl<'a> Snapshot<'a> {
    pub async fn get(&mut self, collection: &str, key: &str) -> Result<Option<Value>> {
        self.store.collection_def(collection)?;
        read_value(&mut self.tx, collection, key).await
    }

    pub async fn get_all(
        &mut self,
        collection: &str,
        index: Option<&str>,
        range: &KeyRange,
    ) -> Result<Vec<Value>> {
        let mut qb = self.store.select_builder(collection, index, range)?;
        push_order(&mut qb, index.is_some(), Direction::Next);

        let rows = qb.build().fetch_all(&mut *self.tx).await?;
        decode_values(&rows)
    }

    pub async fn get_all_records<T: Record>(
        &mut self,
        index: Option<&str>,
        range: &KeyRange,
    ) -> Result<Vec<T>> {
        into_records(self.get_all(T::COLLECTION, index, range).await?)
    }

    /// End the snapshot
    pub async fn close(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// One step of a cursor
#[derive(Debug, Clone)]
pub struct CursorItem {
    /// Index key at this position; `None` when walking the primary key
    pub key: Option<IndexKey>,
    pub primary_key: String,
    pub value: Value,
}

/// Keyset-paginated walk over an index or the primary key
pub struct Cursor {
    store: RecordStore,
    collection: String,
    index: Option<String>,
    range: KeyRange,
    direction: Direction,
    position: Option<(Vec<u8>, String)>,
    buffer: VecDeque<CursorItem>,
    exhausted: bool,
}

impl Cursor {
    pub async fn next(&mut self) -> Result<Option<CursorItem>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Drain up to `limit` values
    pub async fn take(mut self, limit: usize) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(limit.min(CURSOR_PAGE_SIZE as usize));
        while out.len() < limit {
            match self.next().await? {
                Some(item) => out.push(item.value),
                None => break,
            }
        }
        Ok(out)
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let indexed = self.index.is_some();
        let mut qb =
            self.store
                .select_builder(&self.collection, self.index.as_deref(), &self.range)?;

        if let Some((index_key, record_key)) = &self.position {
            let op = match self.direction {
                Direction::Next => " > ",
                Direction::Prev => " < ",
            };
            if indexed {
                qb.push(" AND (ie.index_key");
                qb.push(op);
                qb.push_bind(index_key.clone());
                qb.push(" OR (ie.index_key = ");
                qb.push_bind(index_key.clone());
                qb.push(" AND ie.record_key");
                qb.push(op);
                qb.push_bind(record_key.clone());
                qb.push("))");
            } else {
                qb.push(" AND r.key");
                qb.push(op);
                qb.push_bind(record_key.clone());
            }
        }

        push_order(&mut qb, indexed, self.direction);
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(CURSOR_PAGE_SIZE));

        let rows = qb.build().fetch_all(&self.store.pool).await?;
        if rows.len() < CURSOR_PAGE_SIZE as usize {
            self.exhausted = true;
        }

        for row in rows {
            let record_key: String = row.try_get("record_key")?;
            let text: String = row.try_get("value")?;
            let (raw_key, key) = if indexed {
                let raw: Vec<u8> = row.try_get("index_key")?;
                let key = IndexKey::decode(&raw)?;
                (raw, Some(key))
            } else {
                (Vec::new(), None)
            };

            self.position = Some((raw_key, record_key.clone()));
            self.buffer.push_back(CursorItem {
                key,
                primary_key: record_key,
                value: serde_json::from_str(&text)?,
            });
        }

        Ok(())
    }
}

// ===== SQL helpers =====

fn decode_values(rows: &[SqliteRow]) -> Result<Vec<Value>> {
    rows.iter()
        .map(|row| -> Result<Value> {
            let text: String = row.try_get("value")?;
            Ok(serde_json::from_str(&text)?)
        })
        .collect()
}

fn into_records<T: DeserializeOwned>(values: Vec<Value>) -> Result<Vec<T>> {
    values
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(AppError::from))
        .collect()
}

async fn record_exists(conn: &mut SqliteConnection, collection: &str, key: &str) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM records WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

fn push_order(qb: &mut QueryBuilder<'static, Sqlite>, indexed: bool, direction: Direction) {
    let dir = match direction {
        Direction::Next => "ASC",
        Direction::Prev => "DESC",
    };
    if indexed {
        qb.push(format!(" ORDER BY ie.index_key {dir}, ie.record_key {dir}"));
    } else {
        qb.push(format!(" ORDER BY r.key {dir}"));
    }
}

fn push_range(qb: &mut QueryBuilder<'static, Sqlite>, indexed: bool, range: &KeyRange) -> Result<()> {
    let column = if indexed { "ie.index_key" } else { "r.key" };

    match &range.lower {
        Bound::Included(key) => push_comparison(qb, column, " >= ", key, indexed)?,
        Bound::Excluded(key) => push_comparison(qb, column, " > ", key, indexed)?,
        Bound::Unbounded => {}
    }
    match &range.upper {
        Bound::Included(key) => push_comparison(qb, column, " <= ", key, indexed)?,
        Bound::Excluded(key) => push_comparison(qb, column, " < ", key, indexed)?,
        Bound::Unbounded => {}
    }
    Ok(())
}

fn push_comparison(
    qb: &mut QueryBuilder<'static, Sqlite>,
    column: &str,
    op: &str,
    key: &IndexKey,
    indexed: bool,
) -> Result<()> {
    qb.push(" AND ");
    qb.push(column);
    qb.push(op);
    if indexed {
        qb.push_bind(key.encode());
    } else {
        match key {
            IndexKey::Text(s) => {
                qb.push_bind(s.clone());
            }
            other => {
                return Err(AppError::Generic(format!(
                    "Primary key ranges take text keys, got {:?}",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn resolve_key(def: &CollectionDef, explicit: Option<&str>, value: &Value) -> Result<String> {
    match def.key_path {
        Some(path) => {
            let found = resolve_path(value, path);
            let inline = match found.first() {
                Some(Value::String(s)) if found.len() == 1 && !s.is_empty() => s.clone(),
                _ => {
                    return Err(AppError::MissingKey {
                        collection: def.name.to_string(),
                        reason: format!("'{}' must be a non-empty string", path),
                    })
                }
            };

            if let Some(explicit) = explicit {
                if explicit != inline {
                    return Err(AppError::MissingKey {
                        collection: def.name.to_string(),
                        reason: format!(
                            "explicit key '{}' disagrees with '{}' = '{}'",
                            explicit, path, inline
                        ),
                    });
                }
            }
            Ok(inline)
        }
        None => explicit
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::MissingKey {
                collection: def.name.to_string(),
                reason: "keys are stored out of line and none was given".to_string(),
            }),
    }
}

async fn read_value(conn: &mut SqliteConnection, collection: &str, key: &str) -> Result<Option<Value>> {
    let text: Option<String> =
        sqlx::query_scalar("SELECT value FROM records WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;

    match text {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

async fn write_record(
    conn: &mut SqliteConnection,
    def: &CollectionDef,
    key: &str,
    value: &Value,
) -> Result<()> {
    let encoded = serde_json::to_string(value)?;

    clear_index_entries(conn, def.name, key).await?;

    sqlx::query(
        r#"
        INSERT INTO records (collection, key, value) VALUES (?, ?, ?)
        ON CONFLICT(collection, key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(def.name)
    .bind(key)
    .bind(&encoded)
    .execute(&mut *conn)
    .await?;

    for index in &def.indexes {
        add_index_entries(conn, def.name, index, key, value).await?;
    }

    Ok(())
}

async fn add_index_entries(
    conn: &mut SqliteConnection,
    collection: &str,
    index: &IndexDef,
    key: &str,
    value: &Value,
) -> Result<()> {
    for index_key in extract_keys(value, index.key_path, index.multi_entry) {
        let encoded = index_key.encode();

        if index.unique {
            let holder: Option<String> = sqlx::query_scalar(
                r#"
                SELECT record_key FROM index_entries
                WHERE collection = ? AND index_name = ? AND index_key = ? AND record_key <> ?
                LIMIT 1
                "#,
            )
            .bind(collection)
            .bind(index.name)
            .bind(encoded.as_slice())
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;

            if holder.is_some() {
                return Err(AppError::ConstraintViolation {
                    collection: collection.to_string(),
                    index: index.name.to_string(),
                });
            }
        }

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO index_entries (collection, index_name, index_key, record_key)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(collection)
        .bind(index.name)
        .bind(encoded.as_slice())
        .bind(key)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn clear_index_entries(conn: &mut SqliteConnection, collection: &str, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM index_entries WHERE collection = ? AND record_key = ?")
        .bind(collection)
        .bind(key)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn register_collection(conn: &mut SqliteConnection, def: &CollectionDef) -> Result<bool> {
    let stored: Option<Option<String>> =
        sqlx::query_scalar("SELECT key_path FROM collections WHERE name = ?")
            .bind(def.name)
            .fetch_optional(&mut *conn)
            .await?;

    match stored {
        Some(key_path) => {
            if key_path.as_deref() != def.key_path {
                tracing::warn!(
                    "Collection '{}' was created with key path {:?}, catalog now says {:?}",
                    def.name,
                    key_path,
                    def.key_path
                );
            }
            Ok(false)
        }
        None => {
            sqlx::query("INSERT INTO collections (name, key_path) VALUES (?, ?)")
                .bind(def.name)
                .bind(def.key_path)
                .execute(&mut *conn)
                .await?;
            Ok(true)
        }
    }
}

async fn register_index(
    conn: &mut SqliteConnection,
    def: &CollectionDef,
    index: &IndexDef,
) -> Result<bool> {
    let stored: Option<String> = sqlx::query_scalar(
        "SELECT key_path FROM collection_indexes WHERE collection = ? AND name = ?",
    )
    .bind(def.name)
    .bind(index.name)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(key_path) = stored {
        if key_path != index.key_path {
            tracing::warn!(
                "Index '{}' on '{}' was created over '{}', catalog now says '{}'",
                index.name,
                def.name,
                key_path,
                index.key_path
            );
        }
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO collection_indexes (collection, name, key_path, is_unique, multi_entry)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(def.name)
    .bind(index.name)
    .bind(index.key_path)
    .bind(index.unique)
    .bind(index.multi_entry)
    .execute(&mut *conn)
    .await?;

    // Back-fill from whatever the collection already holds
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT key, value FROM records WHERE collection = ?")
            .bind(def.name)
            .fetch_all(&mut *conn)
            .await?;

    for (key, text) in &rows {
        let value: Value = serde_json::from_str(text)?;
        add_index_entries(conn, def.name, index, key, &value).await?;
    }

    if !rows.is_empty() {
        tracing::info!("Back-filled index '{}' from {} records", index.name, rows.len());
    }

    Ok(true)
}
