//! Uniqueness-tracking set.
//!
//! Records every id (and user email) ever written, so a lookup miss can be
//! told apart: a key in the set but absent from the store is "not yet
//! visible", a key outside the set is "not found".

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

#[async_trait]
pub trait UniqueIndex: Send + Sync {
    async fn insert(&self, keys: &[String]) -> Result<()>;
    async fn contains(&self, key: &str) -> Result<bool>;
    async fn remove(&self, keys: &[String]) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryUniqueIndex {
    keys: Mutex<HashSet<String>>,
}

impl MemoryUniqueIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UniqueIndex for MemoryUniqueIndex {
    async fn insert(&self, keys: &[String]) -> Result<()> {
        let mut set = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        set.extend(keys.iter().cloned());
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let set = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        Ok(set.contains(key))
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        let mut set = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        for k in keys {
            set.remove(k);
        }
        Ok(())
    }
}
