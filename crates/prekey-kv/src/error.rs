use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A transaction was rejected because one of its conditions no longer held.
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("transaction has {count} items, limit is {limit}")]
    TransactionTooLarge { count: usize, limit: usize },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn is_transaction_conflict(&self) -> bool {
        matches!(self, Self::TransactionConflict(_))
    }
}
