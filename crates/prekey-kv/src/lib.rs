pub mod error;
pub mod item;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use item::{Condition, Item, ItemKey, Page, Query, TransactWriteItem, MAX_TRANSACTION_ITEMS};
pub use memory::MemoryKeyValueStore;
pub use sqlite::SqliteKeyValueStore;
pub use store::KeyValueStore;
