//! Item addressing and transaction descriptors.
//!
//! Every item lives in a named table under a `(partition, sort)` key. Items
//! sharing a partition are ordered by their sort key bytes, so a sort key
//! prefix selects a contiguous range.

/// Upper bound on the number of descriptors accepted by one `transact_write`.
pub const MAX_TRANSACTION_ITEMS: usize = 100;

/// Primary key of an item within a table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub partition: Vec<u8>,
    pub sort: Vec<u8>,
}

impl ItemKey {
    pub fn new(partition: impl Into<Vec<u8>>, sort: impl Into<Vec<u8>>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

/// A stored item: its key plus an opaque value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: ItemKey,
    pub value: Vec<u8>,
}

/// Precondition evaluated by a [`TransactWriteItem::ConditionCheck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Exists,
    NotExists,
}

impl Condition {
    pub fn holds(self, present: bool) -> bool {
        match self {
            Self::Exists => present,
            Self::NotExists => !present,
        }
    }
}

/// One write in an all-or-nothing transaction.
///
/// Descriptors are plain values: building one has no side effects, so
/// callers can collect them from unrelated stores and commit them together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactWriteItem {
    /// Unconditional insert-or-overwrite.
    Put { table: String, item: Item },
    /// Remove a single item; succeeds whether or not it exists.
    Delete { table: String, key: ItemKey },
    /// Remove every item in `partition` whose sort key starts with `sort_prefix`.
    DeletePrefix {
        table: String,
        partition: Vec<u8>,
        sort_prefix: Vec<u8>,
    },
    /// Abort the whole transaction unless `condition` holds for `key`.
    ConditionCheck {
        table: String,
        key: ItemKey,
        condition: Condition,
    },
}

impl TransactWriteItem {
    pub fn table(&self) -> &str {
        match self {
            Self::Put { table, .. }
            | Self::Delete { table, .. }
            | Self::DeletePrefix { table, .. }
            | Self::ConditionCheck { table, .. } => table,
        }
    }
}

/// A range read over one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub partition: Vec<u8>,
    pub sort_prefix: Vec<u8>,
    /// Resume strictly after this sort key.
    pub exclusive_start: Option<Vec<u8>>,
    pub limit: usize,
}

impl Query {
    pub fn new(table: impl Into<String>, partition: impl Into<Vec<u8>>) -> Self {
        Self {
            table: table.into(),
            partition: partition.into(),
            sort_prefix: Vec::new(),
            exclusive_start: None,
            limit: usize::MAX,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, sort_prefix: impl Into<Vec<u8>>) -> Self {
        self.sort_prefix = sort_prefix.into();
        self
    }

    #[must_use]
    pub fn starting_after(mut self, sort: Option<Vec<u8>>) -> Self {
        self.exclusive_start = sort;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Item>,
    /// Sort key to pass as `exclusive_start` for the next page, if any remain.
    pub last_evaluated: Option<Vec<u8>>,
}

/// Returns true if `sort` lies in the range selected by `query`.
pub(crate) fn in_range(query: &Query, sort: &[u8]) -> bool {
    sort.starts_with(&query.sort_prefix)
        && query
            .exclusive_start
            .as_deref()
            .is_none_or(|start| sort > start)
}
