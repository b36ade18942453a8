//! Read-mostly set of admin ids

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use sealgate_core::GatewayResult;
use sealgate_meta::AdminDirectory;

/// Admin ids loaded from the [`AdminDirectory`] on first use. Call
/// [`invalidate`](AdminCache::invalidate) after creating or removing an
/// admin; the next lookup reloads under the writer lock.
pub struct AdminCache {
    directory: Arc<dyn AdminDirectory>,
    ids: RwLock<Option<HashSet<String>>>,
}

impl AdminCache {
    pub fn new(directory: Arc<dyn AdminDirectory>) -> Self {
        Self {
            directory,
            ids: RwLock::new(None),
        }
    }

    /// Replace the cached set with the directory's current contents.
    pub async fn load(&self) -> GatewayResult<usize> {
        let ids: HashSet<String> = self.directory.list_admin_ids().await?.into_iter().collect();
        let count = ids.len();
        *self.ids.write() = Some(ids);
        tracing::debug!(admins = count, "admin cache loaded");
        Ok(count)
    }

    pub async fn is_admin(&self, id: &str) -> GatewayResult<bool> {
        let cached = self.ids.read().as_ref().map(|ids| ids.contains(id));
        if let Some(hit) = cached {
            return Ok(hit);
        }
        self.load().await?;
        Ok(self.ids.read().as_ref().is_some_and(|ids| ids.contains(id)))
    }

    pub fn invalidate(&self) {
        *self.ids.write() = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.ids.read().is_some()
    }
}
