//! Distributed lease service.
//!
//! A lease is an exclusive, TTL-bounded claim over a string key. Holders
//! release explicitly; a crashed holder's lease simply expires.

pub mod memory;

use crate::error::{FolioError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

pub use self::memory::MemoryLockService;

#[async_trait]
pub trait LockService: Send + Sync {
    /// Take the lease on `key`, returning an owner token.
    /// Fails with `LockUnavailable` when an unexpired lease exists.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Release `key` if `token` still owns it. `false` means the lease had
    /// already expired or been taken over.
    async fn release(&self, key: &str, token: &str) -> Result<bool>;
}

/// A held lease. Dropping it without `unlock` leaves expiry to the TTL.
pub struct Lease {
    key: String,
    token: String,
    service: Arc<dyn LockService>,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("key", &self.key).finish()
    }
}

impl Lease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn unlock(self) -> Result<bool> {
        self.service.release(&self.key, &self.token).await
    }
}

#[derive(Debug, Clone)]
pub struct LockOptions {
    pub ttl: Duration,
    pub prefix: String,
}

impl LockOptions {
    pub fn from_config(cfg: &crate::config::LockConfig) -> Self {
        Self {
            ttl: cfg.ttl(),
            prefix: cfg.prefix.clone(),
        }
    }

    pub fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.prefix)
        }
    }
}

/// Post-acquisition check: resolves to `true` when the guarded resource is
/// already taken. `None` means holding the lease is enough.
pub type IsLocked<'a> = Option<BoxFuture<'a, Result<bool>>>;

/// Take a lease on `key` and then evaluate `is_locked`. A guard that reports
/// the resource as taken (or errors) releases the lease before returning.
pub async fn create_lock(
    service: Arc<dyn LockService>,
    key: &str,
    opts: &LockOptions,
    is_locked: IsLocked<'_>,
) -> Result<Lease> {
    let full = opts.full_key(key);
    let token = service.acquire(&full, opts.ttl).await?;
    tracing::debug!(key = %full, "lease acquired");
    let lease = Lease {
        key: full,
        token,
        service,
    };

    let Some(guard) = is_locked else {
        return Ok(lease);
    };
    let taken = match guard.await {
        Ok(taken) => taken,
        Err(e) => {
            release_quietly(lease).await;
            return Err(e);
        }
    };
    if taken {
        let key = lease.key.clone();
        release_quietly(lease).await;
        return Err(FolioError::LockUnavailable { keys: vec![key] });
    }
    Ok(lease)
}

/// Release a lease, logging instead of failing. Correctness rests on the
/// TTL, not on the release call.
pub async fn release_quietly(lease: Lease) {
    let key = lease.key.clone();
    match lease.unlock().await {
        Ok(true) => tracing::debug!(key = %key, "lease released"),
        Ok(false) => tracing::warn!(key = %key, "lease already expired at release"),
        Err(e) => tracing::warn!(key = %key, error = %e, "lease release failed"),
    }
}
