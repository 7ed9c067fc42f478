use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use moka::{future::Cache, Expiry};
use sha2::{Digest, Sha256};

/// Short-lived blocklist of access tokens that were logged out before their
/// natural expiry.
#[async_trait]
pub trait RevocationCache: Send + Sync + 'static {
    async fn revoke(&self, token: &str, ttl: Duration) -> Result<()>;

    async fn is_revoked(&self, token: &str) -> Result<bool>;
}

#[derive(Clone, Copy, Debug)]
struct RevokedEntry {
    ttl: Duration,
}

struct EntryTtl;

impl Expiry<String, RevokedEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &RevokedEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub struct InMemoryRevocationCache {
    entries: Cache<String, RevokedEntry>,
}

impl InMemoryRevocationCache {
    pub fn new(max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryTtl)
            .build();
        Self { entries }
    }
}

#[async_trait]
impl RevocationCache for InMemoryRevocationCache {
    async fn revoke(&self, token: &str, ttl: Duration) -> Result<()> {
        self.entries
            .insert(token_key(token), RevokedEntry { ttl })
            .await;
        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> Result<bool> {
        Ok(self.entries.get(&token_key(token)).await.is_some())
    }
}

fn token_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn revoked_tokens_are_reported_until_ttl_elapses() {
        let cache = InMemoryRevocationCache::new(16);
        cache
            .revoke("token-a", Duration::from_millis(80))
            .await
            .unwrap();

        assert!(cache.is_revoked("token-a").await.unwrap());
        assert!(!cache.is_revoked("token-b").await.unwrap());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!cache.is_revoked("token-a").await.unwrap());
    }

    #[test]
    fn keys_are_token_digests() {
        let key = token_key("abc");
        assert_eq!(key.len(), 64);
        assert_ne!(key, "abc");
    }
}
