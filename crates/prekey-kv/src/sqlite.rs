//! `SQLite` storage engine.
//!
//! All logical tables share one physical `items` table keyed by
//! `(table_name, partition, sort)`. BLOB comparison in `SQLite` is a plain
//! `memcmp`, so the primary key order matches the byte order the item
//! model promises.
//!
//! The connection sits behind a mutex and every call hops onto the blocking
//! pool, so async callers never stall a runtime worker on disk I/O.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::item::{Item, ItemKey, Page, Query, TransactWriteItem};
use crate::store::{check_transaction_size, KeyValueStore};
use crate::StoreError;

/// Schema version stored in `PRAGMA user_version`. Bump when the schema changes.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS items (
    table_name TEXT NOT NULL,
    partition BLOB NOT NULL,
    sort BLOB NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (table_name, partition, sort)
) WITHOUT ROWID;
";

const PREFIX_FILTER: &str =
    "table_name = ?1 AND partition = ?2 AND sort >= ?3 AND substr(sort, 1, length(?3)) = ?3";

#[derive(Clone)]
pub struct SqliteKeyValueStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKeyValueStore {
    /// Open (or create) a database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        match current {
            0 => {
                conn.execute_batch(SCHEMA)?;
                conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
                tracing::info!(version = SCHEMA_VERSION, "initialized key store schema");
            }
            SCHEMA_VERSION => {}
            other => {
                tracing::error!(
                    found = other,
                    expected = SCHEMA_VERSION,
                    "key store schema version mismatch"
                );
                return Err(StoreError::Unavailable(format!(
                    "unsupported schema version {other} (expected {SCHEMA_VERSION})"
                )));
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("sqlite worker failed: {e}")))?
    }
}

fn apply(tx: &rusqlite::Transaction<'_>, item: &TransactWriteItem) -> Result<(), StoreError> {
    match item {
        TransactWriteItem::Put { table, item } => {
            tx.execute(
                "INSERT OR REPLACE INTO items (table_name, partition, sort, value) VALUES (?1, ?2, ?3, ?4)",
                params![table, item.key.partition, item.key.sort, item.value],
            )?;
        }
        TransactWriteItem::Delete { table, key } => {
            tx.execute(
                "DELETE FROM items WHERE table_name = ?1 AND partition = ?2 AND sort = ?3",
                params![table, key.partition, key.sort],
            )?;
        }
        TransactWriteItem::DeletePrefix {
            table,
            partition,
            sort_prefix,
        } => {
            tx.execute(
                &format!("DELETE FROM items WHERE {PREFIX_FILTER}"),
                params![table, partition, sort_prefix],
            )?;
        }
        TransactWriteItem::ConditionCheck { .. } => {}
    }
    Ok(())
}

fn exists(tx: &rusqlite::Transaction<'_>, table: &str, key: &ItemKey) -> Result<bool, StoreError> {
    let found = tx
        .query_row(
            "SELECT 1 FROM items WHERE table_name = ?1 AND partition = ?2 AND sort = ?3",
            params![table, key.partition, key.sort],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Vec<u8>>, StoreError> {
        let table = table.to_string();
        let key = key.clone();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM items WHERE table_name = ?1 AND partition = ?2 AND sort = ?3",
                    params![table, key.partition, key.sort],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), StoreError> {
        let table = table.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO items (table_name, partition, sort, value) VALUES (?1, ?2, ?3, ?4)",
                params![table, item.key.partition, item.key.sort, item.value],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_item(
        &self,
        table: &str,
        key: &ItemKey,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let table = table.to_string();
        let key = key.clone();
        self.call(move |conn| {
            // IMMEDIATE takes the write lock up front so another process cannot
            // read the same row between our SELECT and DELETE.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let old: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT value FROM items WHERE table_name = ?1 AND partition = ?2 AND sort = ?3",
                    params![table, key.partition, key.sort],
                    |row| row.get(0),
                )
                .optional()?;
            if old.is_some() {
                tx.execute(
                    "DELETE FROM items WHERE table_name = ?1 AND partition = ?2 AND sort = ?3",
                    params![table, key.partition, key.sort],
                )?;
            }
            tx.commit()?;
            Ok(old)
        })
        .await
    }

    async fn query(&self, query: Query) -> Result<Page, StoreError> {
        self.call(move |conn| {
            // Fetch one extra row to learn whether another page exists.
            let fetch = i64::try_from(query.limit.saturating_add(1)).unwrap_or(i64::MAX);
            let mut stmt = conn.prepare(&format!(
                "SELECT sort, value FROM items WHERE {PREFIX_FILTER} \
                 AND (?4 IS NULL OR sort > ?4) ORDER BY sort LIMIT ?5"
            ))?;
            let rows = stmt.query_map(
                params![
                    query.table,
                    query.partition,
                    query.sort_prefix,
                    query.exclusive_start,
                    fetch
                ],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )?;

            let mut page = Page::default();
            for row in rows {
                let (sort, value) = row?;
                if page.items.len() == query.limit {
                    page.last_evaluated = page.items.last().map(|item| item.key.sort.clone());
                    break;
                }
                page.items.push(Item {
                    key: ItemKey::new(query.partition.clone(), sort),
                    value,
                });
            }
            Ok(page)
        })
        .await
    }

    async fn count(
        &self,
        table: &str,
        partition: &[u8],
        sort_prefix: &[u8],
    ) -> Result<usize, StoreError> {
        let table = table.to_string();
        let partition = partition.to_vec();
        let sort_prefix = sort_prefix.to_vec();
        self.call(move |conn| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM items WHERE {PREFIX_FILTER}"),
                params![table, partition, sort_prefix],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }

    async fn transact_write(&self, items: Vec<TransactWriteItem>) -> Result<(), StoreError> {
        check_transaction_size(&items)?;

        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            for item in &items {
                if let TransactWriteItem::ConditionCheck {
                    table,
                    key,
                    condition,
                } = item
                {
                    if !condition.holds(exists(&tx, table, key)?) {
                        // Dropping `tx` rolls back.
                        return Err(StoreError::TransactionConflict(format!(
                            "condition {condition:?} failed in table {table}"
                        )));
                    }
                }
            }

            for item in &items {
                apply(&tx, item)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn replace_prefix(
        &self,
        table: &str,
        partition: &[u8],
        sort_prefix: &[u8],
        items: Vec<Item>,
    ) -> Result<(), StoreError> {
        let table = table.to_string();
        let partition = partition.to_vec();
        let sort_prefix = sort_prefix.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                &format!("DELETE FROM items WHERE {PREFIX_FILTER}"),
                params![table, partition, sort_prefix],
            )?;
            {
                let mut insert = tx.prepare(
                    "INSERT OR REPLACE INTO items (table_name, partition, sort, value) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for item in &items {
                    insert.execute(params![table, item.key.partition, item.key.sort, item.value])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
