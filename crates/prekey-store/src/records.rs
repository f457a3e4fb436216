//! Pre-key records as stored and dispensed.
//!
//! The store treats key material as opaque bytes: signatures are kept
//! alongside the public key but never verified here.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Caller-assigned key identifier, unique within one device's pool.
pub type KeyId = u64;

/// Common surface of every stored pre-key record.
pub trait PreKey: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    fn key_id(&self) -> KeyId;

    fn public_key(&self) -> &[u8];
}

/// A pre-key carrying a signature by the owner's identity key.
pub trait SignedPreKey: PreKey {
    fn signature(&self) -> &[u8];
}

/// Classical (EC) one-time pre-key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcPreKey {
    pub key_id: KeyId,
    pub public_key: Vec<u8>,
}

/// Legacy classical signed pre-key (repeated use).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcSignedPreKey {
    pub key_id: KeyId,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Signed KEM (post-quantum) pre-key.
///
/// Used both for one-time PQ pre-keys and for the last-resort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KemSignedPreKey {
    pub key_id: KeyId,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl PreKey for EcPreKey {
    fn key_id(&self) -> KeyId {
        self.key_id
    }

    fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

impl PreKey for EcSignedPreKey {
    fn key_id(&self) -> KeyId {
        self.key_id
    }

    fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

impl SignedPreKey for EcSignedPreKey {
    fn signature(&self) -> &[u8] {
        &self.signature
    }
}

impl PreKey for KemSignedPreKey {
    fn key_id(&self) -> KeyId {
        self.key_id
    }

    fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

impl SignedPreKey for KemSignedPreKey {
    fn signature(&self) -> &[u8] {
        &self.signature
    }
}
