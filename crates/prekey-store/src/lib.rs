//! Pre-key storage for asynchronous session establishment.
//!
//! Persists and dispenses the public key material a sender needs to start
//! an encrypted session with a device that may be offline:
//!
//! - single-use pools (classical and post-quantum), dispensed at most once
//! - one repeated-use signed key per device (legacy classical signed
//!   pre-keys, and mandatory post-quantum last-resort keys)
//!
//! [`KeysManager`] is the entry point. It reads a [`MigrationPolicy`] on
//! every call to decide whether legacy signed pre-keys are written and
//! deleted.

pub mod config;
pub mod error;
pub mod identity;
mod layout;
pub mod manager;
pub mod policy;
pub mod records;
pub mod repeated_use;
pub mod single_use;

pub use config::{PreKeyStoreConfig, TableNames};
pub use error::PreKeyError;
pub use identity::{DeviceId, Identity};
pub use manager::KeysManager;
pub use policy::{DynamicMigrationPolicy, MigrationPolicy, MigrationPolicySource};
pub use records::{EcPreKey, EcSignedPreKey, KemSignedPreKey, KeyId, PreKey, SignedPreKey};
pub use repeated_use::{
    RepeatedUseEcSignedPreKeyStore, RepeatedUseKemSignedPreKeyStore, RepeatedUseSignedPreKeyStore,
};
pub use single_use::{SingleUseEcPreKeyStore, SingleUseKemPreKeyStore, SingleUsePreKeyStore};
