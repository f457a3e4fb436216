//! Item key layout shared by the pre-key tables.
//!
//! Partition key: the 16 identity bytes.
//! Single-use sort key: device id byte, then the big-endian key id.
//! Repeated-use sort key: the device id byte alone.

use prekey_kv::ItemKey;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::records::KeyId;
use crate::{DeviceId, Identity, PreKeyError};

pub(crate) fn partition(identity: &Identity) -> Vec<u8> {
    identity.as_bytes().to_vec()
}

pub(crate) fn device_prefix(device_id: DeviceId) -> Vec<u8> {
    vec![device_id.get()]
}

pub(crate) fn single_use_key(identity: &Identity, device_id: DeviceId, key_id: KeyId) -> ItemKey {
    let mut sort = Vec::with_capacity(9);
    sort.push(device_id.get());
    sort.extend_from_slice(&key_id.to_be_bytes());
    ItemKey::new(partition(identity), sort)
}

pub(crate) fn repeated_use_key(identity: &Identity, device_id: DeviceId) -> ItemKey {
    ItemKey::new(partition(identity), device_prefix(device_id))
}

pub(crate) fn device_id_from_sort(table: &str, sort: &[u8]) -> Result<DeviceId, PreKeyError> {
    match sort {
        [device] => Ok(DeviceId::new(*device)),
        _ => Err(PreKeyError::MalformedItem {
            table: table.to_string(),
            reason: format!("expected 1-byte sort key, got {} bytes", sort.len()),
        }),
    }
}

pub(crate) fn encode<K: Serialize>(key: &K) -> Result<Vec<u8>, PreKeyError> {
    Ok(serde_json::to_vec(key)?)
}

pub(crate) fn decode<K: DeserializeOwned>(table: &str, value: &[u8]) -> Result<K, PreKeyError> {
    serde_json::from_slice(value).map_err(|e| PreKeyError::MalformedItem {
        table: table.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_use_keys_group_by_device() {
        let identity = Identity::random();
        let a = single_use_key(&identity, DeviceId::new(2), 300);
        let b = single_use_key(&identity, DeviceId::new(2), 1);

        assert!(a.sort.starts_with(&device_prefix(DeviceId::new(2))));
        assert!(!a.sort.starts_with(&device_prefix(DeviceId::new(3))));
        // Big-endian key ids sort numerically.
        assert!(b.sort < a.sort);
    }

    #[test]
    fn device_id_requires_single_byte() {
        assert_eq!(device_id_from_sort("t", &[4]).unwrap(), DeviceId::new(4));
        assert!(matches!(
            device_id_from_sort("t", &[4, 0]),
            Err(PreKeyError::MalformedItem { .. })
        ));
    }
}
