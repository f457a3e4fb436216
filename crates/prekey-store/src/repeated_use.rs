//! Repeated-use signed pre-keys: at most one per `(identity, device)`.
//!
//! Rotation is a plain overwrite of the device's slot. Insertions and
//! deletions can also be produced as [`TransactWriteItem`] descriptors so a
//! caller can commit them together with unrelated writes.

use std::marker::PhantomData;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use prekey_kv::{Item, KeyValueStore, Query, TransactWriteItem};

use crate::layout;
use crate::records::{EcSignedPreKey, KemSignedPreKey, SignedPreKey};
use crate::{DeviceId, Identity, PreKeyError};

/// Devices read per query when enumerating an identity's devices.
const DEVICE_PAGE_SIZE: usize = 16;

pub type RepeatedUseEcSignedPreKeyStore = RepeatedUseSignedPreKeyStore<EcSignedPreKey>;
pub type RepeatedUseKemSignedPreKeyStore = RepeatedUseSignedPreKeyStore<KemSignedPreKey>;

pub struct RepeatedUseSignedPreKeyStore<K> {
    store: Arc<dyn KeyValueStore>,
    table_name: String,
    _record: PhantomData<fn() -> K>,
}

enum Cursor {
    Start,
    After(Vec<u8>),
    Done,
}

impl<K: SignedPreKey> RepeatedUseSignedPreKeyStore<K> {
    pub fn new(store: Arc<dyn KeyValueStore>, table_name: impl Into<String>) -> Self {
        Self {
            store,
            table_name: table_name.into(),
            _record: PhantomData,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Store (or rotate) the device's key.
    pub async fn store(
        &self,
        identity: &Identity,
        device_id: DeviceId,
        key: &K,
    ) -> Result<(), PreKeyError> {
        self.store
            .put_item(&self.table_name, self.item(identity, device_id, key)?)
            .await?;
        tracing::debug!(
            table = %self.table_name,
            identity = %identity,
            device = %device_id,
            key_id = key.key_id(),
            "stored repeated-use pre-key"
        );
        Ok(())
    }

    pub async fn find(
        &self,
        identity: &Identity,
        device_id: DeviceId,
    ) -> Result<Option<K>, PreKeyError> {
        let key = layout::repeated_use_key(identity, device_id);
        match self.store.get_item(&self.table_name, &key).await? {
            Some(value) => layout::decode(&self.table_name, &value).map(Some),
            None => Ok(None),
        }
    }

    pub fn build_transact_write_item_for_insertion(
        &self,
        identity: &Identity,
        device_id: DeviceId,
        key: &K,
    ) -> Result<TransactWriteItem, PreKeyError> {
        Ok(TransactWriteItem::Put {
            table: self.table_name.clone(),
            item: self.item(identity, device_id, key)?,
        })
    }

    pub fn build_transact_write_item_for_deletion(
        &self,
        identity: &Identity,
        device_id: DeviceId,
    ) -> TransactWriteItem {
        TransactWriteItem::Delete {
            table: self.table_name.clone(),
            key: layout::repeated_use_key(identity, device_id),
        }
    }

    /// Delete the keys of every device under `identity`.
    pub async fn delete(&self, identity: &Identity) -> Result<(), PreKeyError> {
        self.store
            .transact_write(vec![TransactWriteItem::DeletePrefix {
                table: self.table_name.clone(),
                partition: layout::partition(identity),
                sort_prefix: Vec::new(),
            }])
            .await?;
        tracing::debug!(table = %self.table_name, identity = %identity, "deleted repeated-use pre-keys");
        Ok(())
    }

    /// Stream the ids of devices under `identity` that currently hold a key.
    ///
    /// Pages are fetched lazily as the stream is polled. The stream is finite
    /// and owns its state; call again to restart from the beginning.
    pub fn device_ids_with_keys(
        &self,
        identity: &Identity,
    ) -> BoxStream<'static, Result<DeviceId, PreKeyError>> {
        let store = Arc::clone(&self.store);
        let table = self.table_name.clone();
        let partition = layout::partition(identity);

        stream::try_unfold(Cursor::Start, move |cursor| {
            let store = Arc::clone(&store);
            let table = table.clone();
            let partition = partition.clone();
            async move {
                let start = match cursor {
                    Cursor::Done => return Ok(None),
                    Cursor::Start => None,
                    Cursor::After(sort) => Some(sort),
                };
                device_page(store.as_ref(), &table, partition, start)
                    .await
                    .map(Some)
            }
        })
        .map_ok(|devices| stream::iter(devices.into_iter().map(Ok::<_, PreKeyError>)))
        .try_flatten()
        .boxed()
    }

    fn item(&self, identity: &Identity, device_id: DeviceId, key: &K) -> Result<Item, PreKeyError> {
        Ok(Item {
            key: layout::repeated_use_key(identity, device_id),
            value: layout::encode(key)?,
        })
    }
}

/// Fetch one page of device ids and the cursor for the next page.
async fn device_page(
    store: &dyn KeyValueStore,
    table: &str,
    partition: Vec<u8>,
    start: Option<Vec<u8>>,
) -> Result<(Vec<DeviceId>, Cursor), PreKeyError> {
    let page = store
        .query(
            Query::new(table, partition)
                .starting_after(start)
                .with_limit(DEVICE_PAGE_SIZE),
        )
        .await?;
    let devices = page
        .items
        .iter()
        .map(|item| layout::device_id_from_sort(table, &item.key.sort))
        .collect::<Result<Vec<_>, _>>()?;
    let next = page.last_evaluated.map_or(Cursor::Done, Cursor::After);
    Ok((devices, next))
}

#[cfg(test)]
mod tests {
    use prekey_kv::MemoryKeyValueStore;

    use super::*;

    fn last_resort(key_id: u64) -> KemSignedPreKey {
        KemSignedPreKey {
            key_id,
            public_key: vec![0x08; 32],
            signature: vec![0x5a; 64],
        }
    }

    fn store_with(kv: &Arc<MemoryKeyValueStore>) -> RepeatedUseKemSignedPreKeyStore {
        RepeatedUseSignedPreKeyStore::new(Arc::clone(kv) as Arc<dyn KeyValueStore>, "PqLastResortKeys")
    }

    #[tokio::test]
    async fn rotation_overwrites_slot() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = store_with(&kv);
        let identity = Identity::random();

        store.store(&identity, DeviceId::PRIMARY, &last_resort(1)).await.unwrap();
        store.store(&identity, DeviceId::PRIMARY, &last_resort(2)).await.unwrap();

        assert_eq!(
            store.find(&identity, DeviceId::PRIMARY).await.unwrap(),
            Some(last_resort(2))
        );
        assert_eq!(kv.len(), 1);
    }

    #[tokio::test]
    async fn find_missing_is_none() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = store_with(&kv);
        assert!(store
            .find(&Identity::random(), DeviceId::PRIMARY)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn descriptors_are_inert_until_committed() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = store_with(&kv);
        let identity = Identity::random();

        let insert = store
            .build_transact_write_item_for_insertion(&identity, DeviceId::PRIMARY, &last_resort(9))
            .unwrap();
        assert!(kv.is_empty());

        kv.transact_write(vec![insert]).await.unwrap();
        assert_eq!(
            store.find(&identity, DeviceId::PRIMARY).await.unwrap(),
            Some(last_resort(9))
        );

        let delete = store.build_transact_write_item_for_deletion(&identity, DeviceId::PRIMARY);
        assert!(store.find(&identity, DeviceId::PRIMARY).await.unwrap().is_some());
        kv.transact_write(vec![delete]).await.unwrap();
        assert!(store.find(&identity, DeviceId::PRIMARY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enumerates_devices_across_pages() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = store_with(&kv);
        let identity = Identity::random();
        let expected: Vec<_> = (1..=40u8).map(DeviceId::new).collect();
        for device in &expected {
            store.store(&identity, *device, &last_resort(1)).await.unwrap();
        }
        store.store(&Identity::random(), DeviceId::PRIMARY, &last_resort(1)).await.unwrap();

        let devices: Vec<_> = store.device_ids_with_keys(&identity).try_collect().await.unwrap();
        assert_eq!(devices, expected);

        // Restartable: a second stream starts from the beginning.
        let again: Vec<_> = store.device_ids_with_keys(&identity).try_collect().await.unwrap();
        assert_eq!(again.len(), 40);
    }
}
