use std::sync::Arc;

use jsonwebtoken::jwk::{Jwk, JwkSet};
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::error::Error;
use crate::http::{ensure_success, read_json};

/// Process-wide cache of the provider's published ID token signing keys.
///
/// The set is fetched on first use and reused afterwards. A `kid` that is not in
/// the cached set triggers one refetch, so rotated keys are picked up without a
/// restart.
#[derive(Debug)]
pub struct JwksCache {
    url: Url,
    http: reqwest::Client,
    keys: RwLock<Option<Arc<JwkSet>>>,
    fetch_lock: Mutex<()>,
}

impl JwksCache {
    #[must_use]
    pub fn new(url: Url, http: reqwest::Client) -> Self {
        Self {
            url,
            http,
            keys: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Looks up the signing key `kid`, refetching the set once on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] or [`Error::Login`] if the key set cannot be fetched,
    /// and [`Error::Token`] if no published key has this id.
    pub async fn key(&self, kid: &str) -> Result<Jwk, Error> {
        if let Some(set) = self.cached().await {
            if let Some(jwk) = set.find(kid) {
                return Ok(jwk.clone());
            }
            tracing::debug!(kid, "Signing key not cached, refetching key set");
        }

        let set = self.refresh(kid).await?;
        set.find(kid)
            .cloned()
            .ok_or_else(|| Error::Token(format!("no published signing key with kid {kid:?}")))
    }

    /// Drops the cached key set; the next lookup fetches it again.
    pub async fn invalidate(&self) {
        *self.keys.write().await = None;
    }

    async fn cached(&self) -> Option<Arc<JwkSet>> {
        self.keys.read().await.clone()
    }

    async fn refresh(&self, kid: &str) -> Result<Arc<JwkSet>, Error> {
        // One fetch at a time; a waiter reuses the set a concurrent fetch stored.
        let _guard = self.fetch_lock.lock().await;
        if let Some(set) = self.cached().await {
            if set.find(kid).is_some() {
                return Ok(set);
            }
        }

        let response = self.http.get(self.url.clone()).send().await?;
        let response = ensure_success(response, "key set").await?;
        let set: Arc<JwkSet> = Arc::new(read_json(response, "key set").await?);

        tracing::debug!(keys = set.keys.len(), "Fetched ID token signing keys");
        *self.keys.write().await = Some(set.clone());
        Ok(set)
    }
}
