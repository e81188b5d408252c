use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Shared set of revoked bearer tokens, consulted by `__auth` on every request.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// `expires_at` is the token's own expiry (unix seconds); entries may be forgotten after it.
    async fn revoke(&self, token: &str, expires_at: i64);

    async fn is_revoked(&self, token: &str) -> bool;
}

/// In-process revocation set. Tokens are kept as SHA-256 fingerprints.
#[derive(Default)]
pub struct MemoryRevocationStore {
    revoked: RwLock<HashMap<String, i64>>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.revoked.read().await.len()
    }
}

fn fingerprint(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, token: &str, expires_at: i64) {
        let now = Utc::now().timestamp();
        let mut revoked = self.revoked.write().await;
        revoked.retain(|_, exp| *exp > now);
        revoked.insert(fingerprint(token), expires_at);
    }

    async fn is_revoked(&self, token: &str) -> bool {
        self.revoked.read().await.contains_key(&fingerprint(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_revoked_token_is_reported() {
        let store = MemoryRevocationStore::new();
        let exp = Utc::now().timestamp() + 3600;

        assert!(!store.is_revoked("abc.def.ghi").await);
        store.revoke("abc.def.ghi", exp).await;
        assert!(store.is_revoked("abc.def.ghi").await);
        assert!(!store.is_revoked("abc.def.ghj").await);
    }

    #[tokio::test]
    async fn test_expired_entries_are_purged_on_revoke() {
        let store = MemoryRevocationStore::new();
        store.revoke("old", Utc::now().timestamp() - 10).await;
        store.revoke("new", Utc::now().timestamp() + 3600).await;
        assert_eq!(store.len().await, 1);
        assert!(store.is_revoked("new").await);
    }
}
