//! Orchestration over the four pre-key stores.
//!
//! `KeysManager` routes each call to the right store, applies the current
//! [`MigrationPolicy`] wherever legacy signed pre-keys are involved, and
//! builds the transaction descriptors used by device add/remove flows.

use std::sync::Arc;

use futures::stream::{BoxStream, TryStreamExt};
use prekey_kv::{KeyValueStore, TransactWriteItem};

use crate::config::TableNames;
use crate::policy::{MigrationPolicy, MigrationPolicySource};
use crate::records::{EcPreKey, EcSignedPreKey, KemSignedPreKey};
use crate::repeated_use::{RepeatedUseEcSignedPreKeyStore, RepeatedUseKemSignedPreKeyStore};
use crate::single_use::{SingleUseEcPreKeyStore, SingleUseKemPreKeyStore};
use crate::{DeviceId, Identity, PreKeyError};

/// Outcome of the first step of a post-quantum take.
enum PqTake {
    /// The one-time pool produced a key.
    OneTimeAvailable(KemSignedPreKey),
    /// The one-time pool is empty; answer with the last-resort key.
    FallbackToLastResort,
}

pub struct KeysManager {
    policy: Arc<dyn MigrationPolicySource>,
    ec_pre_keys: SingleUseEcPreKeyStore,
    pq_pre_keys: SingleUseKemPreKeyStore,
    ec_signed_pre_keys: RepeatedUseEcSignedPreKeyStore,
    pq_last_resort_keys: RepeatedUseKemSignedPreKeyStore,
}

impl KeysManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        tables: &TableNames,
        policy: Arc<dyn MigrationPolicySource>,
    ) -> Result<Self, PreKeyError> {
        tables.validate()?;
        Ok(Self {
            policy,
            ec_pre_keys: SingleUseEcPreKeyStore::new(Arc::clone(&store), &tables.ec_pre_keys),
            pq_pre_keys: SingleUseKemPreKeyStore::new(Arc::clone(&store), &tables.pq_pre_keys),
            ec_signed_pre_keys: RepeatedUseEcSignedPreKeyStore::new(
                Arc::clone(&store),
                &tables.ec_signed_pre_keys,
            ),
            pq_last_resort_keys: RepeatedUseKemSignedPreKeyStore::new(
                store,
                &tables.pq_last_resort_keys,
            ),
        })
    }

    fn policy(&self) -> MigrationPolicy {
        self.policy.migration_policy()
    }

    // ── Transaction descriptors ─────────────────────────────────────

    /// Insertion descriptor for a legacy signed pre-key, or `None` while
    /// legacy writes are switched off.
    pub fn build_write_item_for_legacy_signed_key(
        &self,
        identity: &Identity,
        device_id: DeviceId,
        key: &EcSignedPreKey,
    ) -> Result<Option<TransactWriteItem>, PreKeyError> {
        if !self.policy().store_legacy_signed_keys {
            return Ok(None);
        }
        self.ec_signed_pre_keys
            .build_transact_write_item_for_insertion(identity, device_id, key)
            .map(Some)
    }

    pub fn build_write_item_for_last_resort_key(
        &self,
        identity: &Identity,
        device_id: DeviceId,
        key: &KemSignedPreKey,
    ) -> Result<TransactWriteItem, PreKeyError> {
        self.pq_last_resort_keys
            .build_transact_write_item_for_insertion(identity, device_id, key)
    }

    /// Descriptors for a device's initial keys under both identities.
    ///
    /// Always contains the two last-resort insertions; the two legacy signed
    /// key insertions follow only while legacy writes are enabled.
    #[allow(clippy::too_many_arguments)]
    pub fn build_write_items_for_new_device(
        &self,
        account_identity: &Identity,
        phone_identity: &Identity,
        device_id: DeviceId,
        account_signed_key: &EcSignedPreKey,
        phone_signed_key: &EcSignedPreKey,
        account_last_resort: &KemSignedPreKey,
        phone_last_resort: &KemSignedPreKey,
    ) -> Result<Vec<TransactWriteItem>, PreKeyError> {
        let mut items = vec![
            self.pq_last_resort_keys.build_transact_write_item_for_insertion(
                account_identity,
                device_id,
                account_last_resort,
            )?,
            self.pq_last_resort_keys.build_transact_write_item_for_insertion(
                phone_identity,
                device_id,
                phone_last_resort,
            )?,
        ];

        if self.policy().store_legacy_signed_keys {
            items.push(self.ec_signed_pre_keys.build_transact_write_item_for_insertion(
                account_identity,
                device_id,
                account_signed_key,
            )?);
            items.push(self.ec_signed_pre_keys.build_transact_write_item_for_insertion(
                phone_identity,
                device_id,
                phone_signed_key,
            )?);
        }

        Ok(items)
    }

    /// Descriptors removing a device's repeated-use keys under both identities.
    ///
    /// Legacy signed key deletions are included only while the deletion
    /// sweep is enabled, independently of whether they are still written.
    pub fn build_write_items_for_removed_device(
        &self,
        account_identity: &Identity,
        phone_identity: &Identity,
        device_id: DeviceId,
    ) -> Vec<TransactWriteItem> {
        let mut items = vec![
            self.pq_last_resort_keys
                .build_transact_write_item_for_deletion(account_identity, device_id),
            self.pq_last_resort_keys
                .build_transact_write_item_for_deletion(phone_identity, device_id),
        ];

        if self.policy().delete_legacy_signed_keys {
            items.push(
                self.ec_signed_pre_keys
                    .build_transact_write_item_for_deletion(account_identity, device_id),
            );
            items.push(
                self.ec_signed_pre_keys
                    .build_transact_write_item_for_deletion(phone_identity, device_id),
            );
        }

        items
    }

    // ── Repeated-use keys ───────────────────────────────────────────

    /// Rotate the legacy signed pre-key; a no-op while legacy writes are off.
    pub async fn store_legacy_signed_key(
        &self,
        identity: &Identity,
        device_id: DeviceId,
        key: &EcSignedPreKey,
    ) -> Result<(), PreKeyError> {
        if !self.policy().store_legacy_signed_keys {
            tracing::debug!(
                identity = %identity,
                device = %device_id,
                "legacy signed pre-key writes disabled, skipping"
            );
            return Ok(());
        }
        self.ec_signed_pre_keys.store(identity, device_id, key).await
    }

    pub async fn store_pq_last_resort(
        &self,
        identity: &Identity,
        device_id: DeviceId,
        key: &KemSignedPreKey,
    ) -> Result<(), PreKeyError> {
        self.pq_last_resort_keys.store(identity, device_id, key).await
    }

    pub async fn get_legacy_signed_key(
        &self,
        identity: &Identity,
        device_id: DeviceId,
    ) -> Result<Option<EcSignedPreKey>, PreKeyError> {
        self.ec_signed_pre_keys.find(identity, device_id).await
    }

    pub async fn get_last_resort(
        &self,
        identity: &Identity,
        device_id: DeviceId,
    ) -> Result<Option<KemSignedPreKey>, PreKeyError> {
        self.pq_last_resort_keys.find(identity, device_id).await
    }

    /// Devices under `identity` holding a last-resort key, streamed.
    pub fn pq_enabled_devices(
        &self,
        identity: &Identity,
    ) -> BoxStream<'static, Result<DeviceId, PreKeyError>> {
        self.pq_last_resort_keys.device_ids_with_keys(identity)
    }

    pub async fn get_pq_enabled_devices(
        &self,
        identity: &Identity,
    ) -> Result<Vec<DeviceId>, PreKeyError> {
        self.pq_enabled_devices(identity).try_collect().await
    }

    // ── Single-use keys ─────────────────────────────────────────────

    pub async fn store_ec_one_time_pre_keys(
        &self,
        identity: &Identity,
        device_id: DeviceId,
        keys: &[EcPreKey],
    ) -> Result<(), PreKeyError> {
        self.ec_pre_keys.store(identity, device_id, keys).await
    }

    pub async fn store_kem_one_time_pre_keys(
        &self,
        identity: &Identity,
        device_id: DeviceId,
        keys: &[KemSignedPreKey],
    ) -> Result<(), PreKeyError> {
        self.pq_pre_keys.store(identity, device_id, keys).await
    }

    pub async fn take_ec(
        &self,
        identity: &Identity,
        device_id: DeviceId,
    ) -> Result<Option<EcPreKey>, PreKeyError> {
        self.ec_pre_keys.take(identity, device_id).await
    }

    /// Dispense a post-quantum key: a one-time key when one is left,
    /// otherwise the device's last-resort key. Empty only if both are absent.
    pub async fn take_pq(
        &self,
        identity: &Identity,
        device_id: DeviceId,
    ) -> Result<Option<KemSignedPreKey>, PreKeyError> {
        let step = match self.pq_pre_keys.take(identity, device_id).await? {
            Some(key) => PqTake::OneTimeAvailable(key),
            None => PqTake::FallbackToLastResort,
        };

        match step {
            PqTake::OneTimeAvailable(key) => Ok(Some(key)),
            PqTake::FallbackToLastResort => {
                tracing::debug!(
                    identity = %identity,
                    device = %device_id,
                    "one-time PQ pre-keys exhausted, falling back to last-resort key"
                );
                self.pq_last_resort_keys.find(identity, device_id).await
            }
        }
    }

    pub async fn get_ec_count(
        &self,
        identity: &Identity,
        device_id: DeviceId,
    ) -> Result<usize, PreKeyError> {
        self.ec_pre_keys.count(identity, device_id).await
    }

    pub async fn get_pq_count(
        &self,
        identity: &Identity,
        device_id: DeviceId,
    ) -> Result<usize, PreKeyError> {
        self.pq_pre_keys.count(identity, device_id).await
    }

    /// Delete both single-use pools for every device under `identity`.
    pub async fn delete_single_use_pre_keys(&self, identity: &Identity) -> Result<(), PreKeyError> {
        let (ec, pq) = futures::join!(
            self.ec_pre_keys.delete(identity),
            self.pq_pre_keys.delete(identity),
        );
        ec.and(pq)
    }

    /// Delete both single-use pools of one device.
    pub async fn delete_single_use_pre_keys_for_device(
        &self,
        identity: &Identity,
        device_id: DeviceId,
    ) -> Result<(), PreKeyError> {
        let (ec, pq) = futures::join!(
            self.ec_pre_keys.delete_for_device(identity, device_id),
            self.pq_pre_keys.delete_for_device(identity, device_id),
        );
        ec.and(pq)
    }

    // ── Account deletion ────────────────────────────────────────────

    /// Remove every key held under `identity`, across all devices.
    ///
    /// Legacy signed pre-keys are removed only while the deletion sweep is
    /// enabled, matching device removal.
    pub async fn delete_all_keys(&self, identity: &Identity) -> Result<(), PreKeyError> {
        let delete_legacy = self.policy().delete_legacy_signed_keys;

        let (single_use, last_resort, legacy) = futures::join!(
            self.delete_single_use_pre_keys(identity),
            self.pq_last_resort_keys.delete(identity),
            async {
                if delete_legacy {
                    self.ec_signed_pre_keys.delete(identity).await
                } else {
                    Ok(())
                }
            },
        );
        single_use.and(last_resort).and(legacy)?;

        tracing::info!(identity = %identity, delete_legacy, "deleted all pre-keys for identity");
        Ok(())
    }
}
