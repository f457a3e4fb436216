//! Pools of one-time pre-keys.
//!
//! Each `(identity, device)` owns an unordered pool. Uploading replaces the
//! pool wholesale; [`SingleUsePreKeyStore::take`] removes and returns one key.

use std::marker::PhantomData;
use std::sync::Arc;

use prekey_kv::{Item, KeyValueStore, Query, TransactWriteItem};

use crate::layout;
use crate::records::{EcPreKey, KemSignedPreKey, PreKey};
use crate::{DeviceId, Identity, PreKeyError};

/// Candidates read per query while looking for a key to take.
const TAKE_PAGE_SIZE: usize = 1;

pub type SingleUseEcPreKeyStore = SingleUsePreKeyStore<EcPreKey>;
pub type SingleUseKemPreKeyStore = SingleUsePreKeyStore<KemSignedPreKey>;

pub struct SingleUsePreKeyStore<K> {
    store: Arc<dyn KeyValueStore>,
    table_name: String,
    _record: PhantomData<fn() -> K>,
}

impl<K: PreKey> SingleUsePreKeyStore<K> {
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

    /// Replace the device's pool with `keys` in one atomic commit.
    pub async fn store(
        &self,
        identity: &Identity,
        device_id: DeviceId,
        keys: &[K],
    ) -> Result<(), PreKeyError> {
        let items = keys
            .iter()
            .map(|key| -> Result<Item, PreKeyError> {
                Ok(Item {
                    key: layout::single_use_key(identity, device_id, key.key_id()),
                    value: layout::encode(key)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.store
            .replace_prefix(
                &self.table_name,
                &layout::partition(identity),
                &layout::device_prefix(device_id),
                items,
            )
            .await?;

        tracing::info!(
            table = %self.table_name,
            identity = %identity,
            device = %device_id,
            count = keys.len(),
            "replaced single-use pre-key pool"
        );
        Ok(())
    }

    /// Remove and return one key from the device's pool.
    ///
    /// Candidates are read in key order and claimed with the store's
    /// read-and-delete primitive. A candidate claimed first by a concurrent
    /// caller comes back empty and is skipped, so no key is handed out twice.
    pub async fn take(
        &self,
        identity: &Identity,
        device_id: DeviceId,
    ) -> Result<Option<K>, PreKeyError> {
        let partition = layout::partition(identity);
        let prefix = layout::device_prefix(device_id);
        let mut start = None;

        loop {
            let page = self
                .store
                .query(
                    Query::new(self.table_name.clone(), partition.clone())
                        .with_prefix(prefix.clone())
                        .starting_after(start.take())
                        .with_limit(TAKE_PAGE_SIZE),
                )
                .await?;

            for candidate in page.items {
                if let Some(value) = self.store.delete_item(&self.table_name, &candidate.key).await? {
                    let key: K = layout::decode(&self.table_name, &value)?;
                    tracing::debug!(
                        table = %self.table_name,
                        identity = %identity,
                        device = %device_id,
                        key_id = key.key_id(),
                        "took single-use pre-key"
                    );
                    return Ok(Some(key));
                }
                tracing::trace!(
                    table = %self.table_name,
                    identity = %identity,
                    device = %device_id,
                    "candidate claimed by a concurrent take"
                );
            }

            match page.last_evaluated {
                Some(last) => start = Some(last),
                None => return Ok(None),
            }
        }
    }

    /// Number of undispensed keys for a device. Not a transactional read.
    pub async fn count(&self, identity: &Identity, device_id: DeviceId) -> Result<usize, PreKeyError> {
        Ok(self
            .store
            .count(
                &self.table_name,
                &layout::partition(identity),
                &layout::device_prefix(device_id),
            )
            .await?)
    }

    /// Delete every pool under `identity`.
    pub async fn delete(&self, identity: &Identity) -> Result<(), PreKeyError> {
        self.delete_prefix(identity, Vec::new()).await?;
        tracing::debug!(table = %self.table_name, identity = %identity, "deleted single-use pre-keys");
        Ok(())
    }

    /// Delete one device's pool.
    pub async fn delete_for_device(
        &self,
        identity: &Identity,
        device_id: DeviceId,
    ) -> Result<(), PreKeyError> {
        self.delete_prefix(identity, layout::device_prefix(device_id))
            .await?;
        tracing::debug!(
            table = %self.table_name,
            identity = %identity,
            device = %device_id,
            "deleted single-use pre-keys"
        );
        Ok(())
    }

    async fn delete_prefix(&self, identity: &Identity, sort_prefix: Vec<u8>) -> Result<(), PreKeyError> {
        self.store
            .transact_write(vec![TransactWriteItem::DeletePrefix {
                table: self.table_name.clone(),
                partition: layout::partition(identity),
                sort_prefix,
            }])
            .await?;
        Ok(())
    }
}
