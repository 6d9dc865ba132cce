use std::collections::HashMap;
use std::sync::Arc;

use vmkit_common::{Error, ImageInfo, Query, Result};

use crate::platform;
use crate::ImageHost;

/// Resolves image queries against the registered catalogs.
///
/// Rules:
/// - A query naming a remote is answered by that remote's host only
/// - A query with no remote consults hosts in registration order and takes
///   the first non-empty match
/// - Remotes unsupported on this platform are never registered
pub struct ImageHostRegistry {
    hosts: Vec<Arc<dyn ImageHost>>,
    by_remote: HashMap<String, Arc<dyn ImageHost>>,
}

impl ImageHostRegistry {
    pub fn new(hosts: Vec<Arc<dyn ImageHost>>) -> Self {
        let mut by_remote: HashMap<String, Arc<dyn ImageHost>> = HashMap::new();
        for host in &hosts {
            for remote in host.supported_remotes() {
                if platform::is_remote_supported(&remote) {
                    by_remote.insert(remote, Arc::clone(host));
                }
            }
        }
        Self { hosts, by_remote }
    }

    /// Resolve a query to concrete image metadata.
    pub async fn info_for(&self, query: &Query) -> Result<ImageInfo> {
        if let Some(remote) = query.remote_name.as_deref().filter(|r| !r.is_empty()) {
            let host = self
                .by_remote
                .get(remote)
                .ok_or_else(|| Error::UnknownRemote(remote.to_string()))?;

            if let Some(info) = host.info_for(query).await? {
                return Ok(info);
            }
        } else {
            for host in &self.hosts {
                if let Some(info) = host.info_for(query).await? {
                    return Ok(info);
                }
            }
        }

        Err(Error::NoMatchingImage(query.release.clone()))
    }

    /// Reverse lookup by exact fingerprint, scanning hosts in registration
    /// order. Hosts that error are skipped so one broken catalog cannot mask
    /// the others.
    pub async fn info_for_full_hash(&self, full_hash: &str) -> Option<ImageInfo> {
        for host in &self.hosts {
            if let Ok(info) = host.info_for_full_hash(full_hash).await {
                return Some(info);
            }
        }
        None
    }
}
