use super::LockService;
use crate::error::{FolioError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Single-process lease table. Suitable for tests and the memory backend.
#[derive(Default)]
pub struct MemoryLockService {
    leases: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<String> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if let Some((_, expires)) = leases.get(key) {
            if *expires > now {
                return Err(FolioError::LockUnavailable {
                    keys: vec![key.to_string()],
                });
            }
        }
        let token = uuid::Uuid::new_v4().to_string();
        leases.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(token)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        match leases.get(key) {
            Some((owner, _)) if owner == token => {
                leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
