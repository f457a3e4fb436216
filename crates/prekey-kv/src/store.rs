use async_trait::async_trait;

use crate::item::{Item, ItemKey, Page, Query, TransactWriteItem};
use crate::StoreError;

/// Storage engine contract relied upon by the pre-key stores.
///
/// Engines provide per-item atomicity for every call and all-or-nothing
/// semantics for [`transact_write`](Self::transact_write). They perform no
/// retries of their own; a resilience wrapper may be layered on top by
/// implementing this trait around another engine.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a single item.
    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or overwrite a single item.
    async fn put_item(&self, table: &str, item: Item) -> Result<(), StoreError>;

    /// Atomically delete an item and return the value it held.
    ///
    /// Returns `None` when the item did not exist, which is how two
    /// concurrent callers learn which of them actually removed it.
    async fn delete_item(&self, table: &str, key: &ItemKey)
        -> Result<Option<Vec<u8>>, StoreError>;

    /// Range read over one partition, ordered by sort key.
    async fn query(&self, query: Query) -> Result<Page, StoreError>;

    /// Number of items in `partition` whose sort key starts with `sort_prefix`.
    async fn count(
        &self,
        table: &str,
        partition: &[u8],
        sort_prefix: &[u8],
    ) -> Result<usize, StoreError>;

    /// Apply every descriptor or none of them.
    async fn transact_write(&self, items: Vec<TransactWriteItem>) -> Result<(), StoreError>;

    /// Atomically swap every item in `partition` whose sort key starts with
    /// `sort_prefix` for `items`.
    ///
    /// Readers observe either the old range or the new one. Unlike
    /// [`transact_write`](Self::transact_write) the number of items is not
    /// bounded by [`MAX_TRANSACTION_ITEMS`](crate::MAX_TRANSACTION_ITEMS).
    async fn replace_prefix(
        &self,
        table: &str,
        partition: &[u8],
        sort_prefix: &[u8],
        items: Vec<Item>,
    ) -> Result<(), StoreError>;
}

pub(crate) fn check_transaction_size(items: &[TransactWriteItem]) -> Result<(), StoreError> {
    if items.len() > crate::MAX_TRANSACTION_ITEMS {
        return Err(StoreError::TransactionTooLarge {
            count: items.len(),
            limit: crate::MAX_TRANSACTION_ITEMS,
        });
    }
    Ok(())
}
