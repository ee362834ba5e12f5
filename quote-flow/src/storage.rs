use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::Result;

/// Short-lived key/value storage (the browser's session storage).
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn set_item(&self, key: &str, value: String) -> Result<()>;
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// In-memory implementation of SessionStorage
#[derive(Clone, Default)]
pub struct InMemorySessionStorage {
    items: Arc<DashMap<String, String>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            items: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn set_item(&self, key: &str, value: String) -> Result<()> {
        self.items.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.get(key).map(|entry| entry.value().clone()))
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.remove(key);
        Ok(())
    }
}
