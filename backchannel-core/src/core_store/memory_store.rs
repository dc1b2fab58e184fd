//! In-memory account store, used by tests and ephemeral deployments

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::model::Account;
use super::{AccountStore, StoreError};

/// Non-persistent store; `save` is a no-op.
#[derive(Clone, Default)]
pub struct MemoryAccountStore {
    accounts: Arc<RwLock<HashMap<String, Account>>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.read().await.get(name).cloned())
    }

    async fn insert(&self, account: Account) -> Result<(), StoreError> {
        self.accounts
            .write()
            .await
            .insert(account.name.clone(), account);
        Ok(())
    }

    async fn save(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
