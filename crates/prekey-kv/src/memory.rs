//! In-memory storage engine.
//!
//! Suitable for tests and development. Every call runs under a single lock,
//! which makes each operation (including whole transactions) trivially atomic.
//!
//! **WARNING**: Data is lost on process exit. Use [`SqliteKeyValueStore`]
//! when keys must survive a restart.
//!
//! [`SqliteKeyValueStore`]: crate::SqliteKeyValueStore

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::item::{in_range, Item, ItemKey, Page, Query, TransactWriteItem};
use crate::store::{check_transaction_size, KeyValueStore};
use crate::StoreError;

type Table = BTreeMap<ItemKey, Vec<u8>>;

#[derive(Default)]
pub struct MemoryKeyValueStore {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of items across every table.
    pub fn len(&self) -> usize {
        self.tables.lock().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keys in `partition` whose sort key starts with `prefix`, in order.
fn prefix_keys(table: &Table, partition: &[u8], prefix: &[u8]) -> Vec<ItemKey> {
    table
        .range(ItemKey::new(partition, prefix)..)
        .map(|(key, _)| key)
        .take_while(|key| key.partition == partition && key.sort.starts_with(prefix))
        .cloned()
        .collect()
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .tables
            .lock()
            .get(table)
            .and_then(|t| t.get(key))
            .cloned())
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), StoreError> {
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .insert(item.key, item.value);
        Ok(())
    }

    async fn delete_item(
        &self,
        table: &str,
        key: &ItemKey,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .tables
            .lock()
            .get_mut(table)
            .and_then(|t| t.remove(key)))
    }

    async fn query(&self, query: Query) -> Result<Page, StoreError> {
        let tables = self.tables.lock();
        let Some(table) = tables.get(&query.table) else {
            return Ok(Page::default());
        };

        let mut matching = table
            .range(ItemKey::new(query.partition.clone(), query.sort_prefix.clone())..)
            .take_while(|(key, _)| {
                key.partition == query.partition && key.sort.starts_with(&query.sort_prefix)
            })
            .filter(|(key, _)| in_range(&query, &key.sort))
            .peekable();

        let mut page = Page::default();
        while page.items.len() < query.limit {
            let Some((key, value)) = matching.next() else {
                break;
            };
            page.items.push(Item {
                key: key.clone(),
                value: value.clone(),
            });
        }
        if matching.peek().is_some() {
            page.last_evaluated = page.items.last().map(|item| item.key.sort.clone());
        }
        Ok(page)
    }

    async fn count(
        &self,
        table: &str,
        partition: &[u8],
        sort_prefix: &[u8],
    ) -> Result<usize, StoreError> {
        Ok(self
            .tables
            .lock()
            .get(table)
            .map_or(0, |t| prefix_keys(t, partition, sort_prefix).len()))
    }

    async fn transact_write(&self, items: Vec<TransactWriteItem>) -> Result<(), StoreError> {
        check_transaction_size(&items)?;

        let mut tables = self.tables.lock();

        // Conditions see the state from before the transaction.
        for item in &items {
            if let TransactWriteItem::ConditionCheck {
                table,
                key,
                condition,
            } = item
            {
                let present = tables.get(table).is_some_and(|t| t.contains_key(key));
                if !condition.holds(present) {
                    return Err(StoreError::TransactionConflict(format!(
                        "condition {condition:?} failed in table {table}"
                    )));
                }
            }
        }

        for item in items {
            match item {
                TransactWriteItem::Put { table, item } => {
                    tables.entry(table).or_default().insert(item.key, item.value);
                }
                TransactWriteItem::Delete { table, key } => {
                    if let Some(t) = tables.get_mut(&table) {
                        t.remove(&key);
                    }
                }
                TransactWriteItem::DeletePrefix {
                    table,
                    partition,
                    sort_prefix,
                } => {
                    if let Some(t) = tables.get_mut(&table) {
                        for key in prefix_keys(t, &partition, &sort_prefix) {
                            t.remove(&key);
                        }
                    }
                }
                TransactWriteItem::ConditionCheck { .. } => {}
            }
        }
        Ok(())
    }

    async fn replace_prefix(
        &self,
        table: &str,
        partition: &[u8],
        sort_prefix: &[u8],
        items: Vec<Item>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let t = tables.entry(table.to_string()).or_default();
        for key in prefix_keys(t, partition, sort_prefix) {
            t.remove(&key);
        }
        for item in items {
            t.insert(item.key, item.value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Condition;

    fn item(partition: u8, sort: &[u8], value: &[u8]) -> Item {
        Item {
            key: ItemKey::new(vec![partition], sort.to_vec()),
            value: value.to_vec(),
        }
    }

    #[tokio::test]
    async fn delete_item_returns_old_value_once() {
        let store = MemoryKeyValueStore::new();
        store.put_item("t", item(1, &[1], b"v")).await.unwrap();

        let key = ItemKey::new(vec![1], vec![1]);
        assert_eq!(store.delete_item("t", &key).await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.delete_item("t", &key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn query_pages_through_prefix() {
        let store = MemoryKeyValueStore::new();
        for sort in [[1, 1], [1, 2], [1, 3], [2, 1]] {
            store.put_item("t", item(9, &sort, b"x")).await.unwrap();
        }
        store.put_item("t", item(8, &[1, 1], b"other")).await.unwrap();

        let first = store
            .query(Query::new("t", vec![9]).with_prefix(vec![1]).with_limit(2))
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.last_evaluated, Some(vec![1, 2]));

        let second = store
            .query(
                Query::new("t", vec![9])
                    .with_prefix(vec![1])
                    .starting_after(first.last_evaluated)
                    .with_limit(2),
            )
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].key.sort, vec![1, 3]);
        assert_eq!(second.last_evaluated, None);
    }

    #[tokio::test]
    async fn failed_condition_applies_nothing() {
        let store = MemoryKeyValueStore::new();
        store.put_item("t", item(1, &[1], b"keep")).await.unwrap();

        let result = store
            .transact_write(vec![
                TransactWriteItem::Delete {
                    table: "t".into(),
                    key: ItemKey::new(vec![1], vec![1]),
                },
                TransactWriteItem::ConditionCheck {
                    table: "accounts".into(),
                    key: ItemKey::new(vec![1], vec![]),
                    condition: Condition::Exists,
                },
            ])
            .await;

        assert!(result.unwrap_err().is_transaction_conflict());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn replace_prefix_is_not_bounded_by_transaction_limit() {
        let store = MemoryKeyValueStore::new();
        store.put_item("t", item(1, &[1, 0], b"old")).await.unwrap();
        store.put_item("t", item(1, &[2, 0], b"other")).await.unwrap();

        let fresh: Vec<_> = (0..=crate::MAX_TRANSACTION_ITEMS as u8)
            .map(|i| item(1, &[1, i + 1], b"new"))
            .collect();
        store.replace_prefix("t", &[1], &[1], fresh).await.unwrap();

        assert_eq!(
            store.count("t", &[1], &[1]).await.unwrap(),
            crate::MAX_TRANSACTION_ITEMS + 1
        );
        assert_eq!(store.count("t", &[1], &[2]).await.unwrap(), 1);
        let key = ItemKey::new(vec![1], vec![1, 0]);
        assert!(store.get_item("t", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_transaction_is_rejected() {
        let store = MemoryKeyValueStore::new();
        let items = (0..=crate::MAX_TRANSACTION_ITEMS)
            .map(|i| TransactWriteItem::Put {
                table: "t".into(),
                item: item(1, &i.to_be_bytes(), b"v"),
            })
            .collect();

        let err = store.transact_write(items).await.unwrap_err();
        assert!(matches!(err, StoreError::TransactionTooLarge { .. }));
        assert!(store.is_empty());
    }
}
