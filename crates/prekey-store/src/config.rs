use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{MigrationPolicy, PreKeyError};

/// Backing table for each record class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub ec_pre_keys: String,
    pub pq_pre_keys: String,
    pub ec_signed_pre_keys: String,
    pub pq_last_resort_keys: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            ec_pre_keys: "Keys".into(),
            pq_pre_keys: "PqKeys".into(),
            ec_signed_pre_keys: "EcSignedPreKeys".into(),
            pq_last_resort_keys: "PqLastResortKeys".into(),
        }
    }
}

impl TableNames {
    /// Every class needs its own non-empty table; sharing one would let a
    /// device-prefix scan over one class pick up rows of another.
    pub fn validate(&self) -> Result<(), PreKeyError> {
        let names = [
            &self.ec_pre_keys,
            &self.pq_pre_keys,
            &self.ec_signed_pre_keys,
            &self.pq_last_resort_keys,
        ];
        if names.iter().any(|name| name.is_empty()) {
            return Err(PreKeyError::Config("table names must not be empty".into()));
        }
        let distinct: HashSet<_> = names.iter().collect();
        if distinct.len() != names.len() {
            return Err(PreKeyError::Config("table names must be distinct".into()));
        }
        Ok(())
    }
}

/// Top-level configuration, typically loaded from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreKeyStoreConfig {
    pub tables: TableNames,
    pub migration: MigrationPolicy,
}

impl PreKeyStoreConfig {
    pub fn from_json(json: &str) -> Result<Self, PreKeyError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| PreKeyError::Config(format!("invalid config: {e}")))?;
        config.tables.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreKeyError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| PreKeyError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }
}
