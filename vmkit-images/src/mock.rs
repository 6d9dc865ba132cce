use anyhow::{anyhow, Result};
use async_trait::async_trait;

use vmkit_common::{ImageInfo, Query};

use crate::ImageHost;

/// In-memory image host for tests: a fixed remote name serving canned
/// `ImageInfo` records. Matching follows the real catalogs: a query hits on
/// any alias, or on a fingerprint prefix.
pub struct MockImageHost {
    remote: String,
    images: Vec<ImageInfo>,
}

impl MockImageHost {
    pub fn new(remote: &str) -> Self {
        Self {
            remote: remote.to_string(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, info: ImageInfo) -> Self {
        self.images.push(info);
        self
    }
}

#[async_trait]
impl ImageHost for MockImageHost {
    fn supported_remotes(&self) -> Vec<String> {
        vec![self.remote.clone()]
    }

    async fn info_for(&self, query: &Query) -> Result<Option<ImageInfo>> {
        Ok(self
            .images
            .iter()
            .find(|info| {
                info.aliases.iter().any(|alias| alias == &query.release)
                    || (!query.release.is_empty() && info.id.starts_with(&query.release))
            })
            .cloned())
    }

    async fn info_for_full_hash(&self, full_hash: &str) -> Result<ImageInfo> {
        self.images
            .iter()
            .find(|info| info.id == full_hash)
            .cloned()
            .ok_or_else(|| anyhow!("no image with hash {} on remote {}", full_hash, self.remote))
    }
}
