use prekey_kv::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreKeyError {
    /// Failure reported by the backing store, passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("malformed item in {table}: {reason}")]
    MalformedItem { table: String, reason: String },

    #[error("failed to encode pre-key: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PreKeyError {
    /// True when a multi-item commit lost to a concurrent modification.
    ///
    /// Callers decide whether to rebuild and retry the transaction.
    pub fn is_transaction_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transaction_conflict())
    }
}
