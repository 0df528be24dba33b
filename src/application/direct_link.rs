use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

const LINK_SCHEME: &str = "blob:vsix-fetch/";

/// Session-local handle onto a downloaded payload.
///
/// Not `Clone`: the owner gives it back to [`BlobRegistry::revoke`] exactly once.
#[derive(Debug)]
pub struct DirectLink {
    key: Uuid,
}

impl DirectLink {
    pub fn url(&self) -> String {
        format!("{}{}", LINK_SCHEME, self.key)
    }
}

/// Keeps payloads reachable for as long as a link to them is live.
#[derive(Clone, Default)]
pub struct BlobRegistry {
    blobs: Arc<Mutex<HashMap<Uuid, Bytes>>>,
    revoked: Arc<AtomicUsize>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<Uuid, Bytes>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self, payload: Bytes) -> DirectLink {
        let key = Uuid::new_v4();
        self.blobs().insert(key, payload);
        debug!(%key, "Created direct link");
        DirectLink { key }
    }

    pub fn resolve(&self, link: &DirectLink) -> Option<Bytes> {
        self.blobs().get(&link.key).cloned()
    }

    #[cfg(test)]
    pub fn is_live(&self, url: &str) -> bool {
        url.strip_prefix(LINK_SCHEME)
            .and_then(|key| Uuid::parse_str(key).ok())
            .is_some_and(|key| self.blobs().contains_key(&key))
    }

    pub fn revoke(&self, link: DirectLink) {
        if self.blobs().remove(&link.key).is_some() {
            let revoked = self.revoked.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(key = %link.key, revoked, "Revoked direct link");
        }
    }

    pub fn live_count(&self) -> usize {
        self.blobs().len()
    }

    #[cfg(test)]
    pub fn revoked_count(&self) -> usize {
        self.revoked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_resolve_revoke() {
        let registry = BlobRegistry::new();
        let link = registry.create(Bytes::from_static(b"PK\x03\x04"));
        let url = link.url();

        assert!(url.starts_with("blob:vsix-fetch/"));
        assert!(registry.is_live(&url));
        assert_eq!(registry.resolve(&link).unwrap().len(), 4);

        registry.revoke(link);
        assert!(!registry.is_live(&url));
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.revoked_count(), 1);
    }

    #[test]
    fn test_unknown_urls_are_not_live() {
        let registry = BlobRegistry::new();
        assert!(!registry.is_live("blob:vsix-fetch/not-a-uuid"));
        assert!(!registry.is_live("https://example.com"));
    }
}
