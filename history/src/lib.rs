//! Raw History Store: append-only, per-source observation logs with
//! retention purge.

pub mod store;

pub use store::HistoryStore;
pub use store::memory::MemoryHistoryStore;
pub use store::sqlite_store::SqliteHistoryStore;
