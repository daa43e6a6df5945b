//! Template persistence: remote backend plus encrypted local cache

pub mod backend;
pub mod cache;

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use uru4k_types::{Finger, GalleryEntry, Score, Template, UserId, UserSummary};

use crate::config::SdkConfig;
use crate::error::{Error, Result};

pub use backend::{HttpBackend, TemplateBackend};
pub use cache::SecureCache;

/// Backend access with a per-user cache in front of finger-less loads
///
/// The cache key is the user alone. Users with several enrolled fingers
/// get whichever template was fetched last for a finger-less load.
#[derive(Clone)]
pub struct TemplateStore {
    backend: Arc<dyn TemplateBackend>,
    cache: Option<SecureCache>,
}

impl TemplateStore {
    pub fn new(backend: Arc<dyn TemplateBackend>, cache: Option<SecureCache>) -> Self {
        Self { backend, cache }
    }

    /// HTTP backend and, when enabled, the cache in `cache_dir`
    ///
    /// A cache that cannot be opened is disabled with a warning.
    pub fn from_config(config: &SdkConfig) -> Result<Self> {
        let backend = HttpBackend::new(&config.backend_url, &config.backend)?;

        let cache = if config.enable_cache {
            match SecureCache::open(&config.cache_dir) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!("Template cache disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self::new(Arc::new(backend), cache))
    }

    pub fn cache(&self) -> Option<&SecureCache> {
        self.cache.as_ref()
    }

    /// Upload a template, then cache it
    pub async fn store(&self, user_id: UserId, finger: Finger, template: &Template) -> Result<()> {
        self.backend.store_template(user_id, finger, template).await?;
        self.cache_put(user_id, template.clone()).await;
        Ok(())
    }

    /// Template for `user_id`
    ///
    /// Without `finger` the cache is consulted first; a miss or an entry that
    /// fails to decrypt falls through to the backend and refreshes the cache.
    /// With `finger` the backend is always asked.
    pub async fn load(&self, user_id: UserId, finger: Option<Finger>) -> Result<Template> {
        if finger.is_none() {
            if let Some(template) = self.cached(user_id).await {
                return Ok(template);
            }
        }

        let stored = self.backend.fetch_template(user_id, finger).await?;
        if stored.template.is_empty() {
            return Err(Error::TemplateNotFound { user_id, finger });
        }

        if finger.is_none() {
            self.cache_put(user_id, stored.template.clone()).await;
        }

        Ok(stored.template)
    }

    async fn cached(&self, user_id: UserId) -> Option<Template> {
        match self.on_cache(move |cache| cache.get(user_id)).await? {
            Ok(Some(template)) if !template.is_empty() => {
                debug!(%user_id, "Template cache hit");
                Some(template)
            }
            Ok(_) => None,
            Err(e) => {
                debug!(%user_id, "Ignoring cache entry: {}", e);
                None
            }
        }
    }

    async fn cache_put(&self, user_id: UserId, template: Template) {
        if let Some(Err(e)) = self.on_cache(move |cache| cache.put(user_id, &template)).await {
            warn!(%user_id, "Failed to cache template: {}", e);
        }
    }

    /// Run `op` against the cache on the blocking pool; `None` without a cache
    async fn on_cache<R, F>(&self, op: F) -> Option<Result<R>>
    where
        F: FnOnce(&SecureCache) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let cache = self.cache.clone()?;
        let result = match tokio::task::spawn_blocking(move || op(&cache)).await {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        };
        Some(result)
    }

    /// Identification candidates; never cached
    pub async fn load_gallery(&self, scope: Option<&str>) -> Result<Vec<GalleryEntry>> {
        self.backend.fetch_gallery(scope).await
    }

    /// Record an authentication attempt without waiting for it
    ///
    /// Failures are logged and dropped. Outside a Tokio runtime the event is
    /// discarded. The returned handle is only useful for flushing.
    pub fn log_event(
        &self,
        user_id: Option<UserId>,
        success: bool,
        score: Score,
    ) -> Option<JoinHandle<()>> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime, dropping auth event");
                return None;
            }
        };

        let backend = Arc::clone(&self.backend);
        Some(handle.spawn(async move {
            if let Err(e) = backend.log_auth(user_id, success, score).await {
                warn!(?user_id, success, "Failed to log auth event: {}", e);
            }
        }))
    }

    /// Forget the cached template of `user_id`
    pub async fn evict(&self, user_id: UserId) -> Result<bool> {
        self.on_cache(move |cache| cache.remove(user_id))
            .await
            .unwrap_or(Ok(false))
    }

    /// Empty the cache; returns how many entries were removed
    pub async fn clear_cache(&self) -> Result<usize> {
        self.on_cache(SecureCache::clear).await.unwrap_or(Ok(0))
    }

    pub async fn create_user(&self, name: &str, email: Option<&str>) -> Result<UserId> {
        self.backend.create_user(name, email).await
    }

    pub async fn list_users(&self) -> Result<Vec<UserSummary>> {
        self.backend.list_users().await
    }

    pub async fn user_fingers(&self, user_id: UserId) -> Result<Vec<Finger>> {
        self.backend.user_fingers(user_id).await
    }
}
