//! Runtime-mutable migration policy for legacy classical signed pre-keys.
//!
//! The two flags are independent: writes of legacy keys can be switched off
//! while deletions continue, or the deletion sweep can lag behind.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::PreKeyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationPolicy {
    /// Write legacy signed pre-keys on upload and device creation.
    pub store_legacy_signed_keys: bool,
    /// Delete legacy signed pre-keys when a device or account is removed.
    pub delete_legacy_signed_keys: bool,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        Self {
            store_legacy_signed_keys: true,
            delete_legacy_signed_keys: true,
        }
    }
}

/// Where the manager reads the current policy from.
///
/// Implementations are queried once per operation and must not cache on
/// the caller's behalf.
pub trait MigrationPolicySource: Send + Sync {
    fn migration_policy(&self) -> MigrationPolicy;
}

impl MigrationPolicySource for MigrationPolicy {
    fn migration_policy(&self) -> MigrationPolicy {
        *self
    }
}

/// A policy that can be swapped while the service is running.
#[derive(Debug, Default)]
pub struct DynamicMigrationPolicy {
    current: RwLock<MigrationPolicy>,
}

impl DynamicMigrationPolicy {
    pub fn new(initial: MigrationPolicy) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub fn set(&self, policy: MigrationPolicy) {
        let previous = std::mem::replace(&mut *self.current.write(), policy);
        if previous != policy {
            tracing::info!(
                store_legacy_signed_keys = policy.store_legacy_signed_keys,
                delete_legacy_signed_keys = policy.delete_legacy_signed_keys,
                "migration policy updated"
            );
        }
    }

    /// Replace the policy from a JSON document. Missing fields take defaults.
    pub fn reload_from_json(&self, json: &str) -> Result<MigrationPolicy, PreKeyError> {
        let policy: MigrationPolicy = serde_json::from_str(json)
            .map_err(|e| PreKeyError::Config(format!("invalid migration policy: {e}")))?;
        self.set(policy);
        Ok(policy)
    }
}

impl MigrationPolicySource for DynamicMigrationPolicy {
    fn migration_policy(&self) -> MigrationPolicy {
        *self.current.read()
    }
}
