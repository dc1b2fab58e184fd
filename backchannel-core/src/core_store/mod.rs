//! Account store
//!
//! The persisted collection of user records, behind a narrow
//! `find_by_name`/`insert`/`save` seam. Uniqueness of names is the caller's
//! responsibility; `insert` is deliberately unconditional.

use async_trait::async_trait;

mod error;
mod file_store;
mod memory_store;
pub mod model;

pub use error::StoreError;
pub use file_store::JsonFileStore;
pub use memory_store::MemoryAccountStore;
pub use model::Account;

/// Abstract account collection
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Look up a record by exact, case-sensitive name.
    async fn find_by_name(&self, name: &str) -> Result<Option<Account>, StoreError>;

    /// Insert a record unconditionally.
    async fn insert(&self, account: Account) -> Result<(), StoreError>;

    /// Durably persist the full collection.
    async fn save(&self) -> Result<(), StoreError>;
}
