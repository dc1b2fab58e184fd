//! JSON-file-backed account store
//!
//! The whole collection lives in memory and `save` rewrites the file in one
//! shot. That matches the access pattern: a handful of mutations per login
//! session, reads on every authenticate.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::model::Account;
use super::{AccountStore, StoreError};

pub struct JsonFileStore {
    path: PathBuf,
    accounts: Arc<RwLock<HashMap<String, Account>>>,
}

impl JsonFileStore {
    /// Open a store, loading any existing collection from `path`.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let accounts = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let records: Vec<Account> = serde_json::from_str(&contents)?;
            info!(count = records.len(), "Loaded account collection");
            records.into_iter().map(|a| (a.name.clone(), a)).collect()
        } else {
            info!("No account collection found, starting empty");
            HashMap::new()
        };

        Ok(Self {
            path,
            accounts: Arc::new(RwLock::new(accounts)),
        })
    }
}

#[async_trait]
impl AccountStore for JsonFileStore {
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
        let records: Vec<Account> = {
            let accounts = self.accounts.read().await;
            let mut records: Vec<Account> = accounts.values().cloned().collect();
            // stable on-disk order keeps the file diffable
            records.sort_by(|a, b| a.name.cmp(&b.name));
            records
        };

        let contents = serde_json::to_string_pretty(&records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account(name: &str) -> Account {
        Account::new(
            name.to_string(),
            format!("hash-{name}"),
            json!({"publicKey": "pk"}),
            vec![json!({"publicKey": "hk"})],
        )
    }

    #[tokio::test]
    async fn test_save_then_reopen_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("accounts.json");

        let store = JsonFileStore::open(path.clone()).expect("open");
        store.insert(account("alice")).await.expect("insert");
        store.insert(account("bob")).await.expect("insert");
        store.save().await.expect("save");

        let reopened = JsonFileStore::open(path).expect("reopen");
        let alice = reopened
            .find_by_name("alice")
            .await
            .expect("find")
            .expect("alice persisted");
        assert_eq!(alice.password_hash, "hash-alice");
        assert!(reopened
            .find_by_name("bob")
            .await
            .expect("find")
            .is_some());
    }

    #[tokio::test]
    async fn test_open_missing_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::open(dir.path().join("none.json")).expect("open");
        assert!(store.find_by_name("alice").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn test_open_rejects_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("accounts.json");
        std::fs::write(&path, "not json").expect("write");
        assert!(matches!(
            JsonFileStore::open(path),
            Err(StoreError::Serialization(_))
        ));
    }
}
