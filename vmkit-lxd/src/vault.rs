use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use vmkit_common::{
    Error, FetchType, PrepareAction, ProgressMonitor, Query, QueryType, Result, VMImage,
};
use vmkit_images::{platform, ImageHost, ImageHostRegistry, ImageVault};

use crate::operations;
use crate::transport::{expect_found, RemoteResponse, Transport};

/// Image store backed by the remote daemon.
///
/// The daemon caches pulled images keyed by fingerprint and owns their
/// lifetime, so "fetching" reduces to: resolve the query against the
/// catalogs, skip the pull when the fingerprint is already present, and
/// otherwise drive the daemon's pull operation with progress reporting.
pub struct LxdImageVault {
    registry: ImageHostRegistry,
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl LxdImageVault {
    pub fn new(
        image_hosts: Vec<Arc<dyn ImageHost>>,
        transport: Arc<dyn Transport>,
        base_url: &str,
    ) -> Self {
        Self {
            registry: ImageHostRegistry::new(image_hosts),
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn instance_url(&self, name: &str) -> String {
        format!("{}/virtual-machines/{}", self.base_url, name)
    }

    /// If an instance already exists for the query's name, look up the image
    /// it was launched from and surface that in the logs. Failures here are
    /// irrelevant to the fetch itself.
    async fn log_existing_image(&self, name: &str) {
        let reply = match self
            .transport
            .request("GET", &self.instance_url(name), None, None)
            .await
        {
            Ok(RemoteResponse::Found(reply)) => reply,
            _ => return,
        };

        let Some(id) = reply["metadata"]["config"]["volatile.base_image"].as_str() else {
            return;
        };

        if let Some(info) = self.registry.info_for_full_hash(id).await {
            tracing::debug!(
                "instance {} was launched from {} ({})",
                name,
                info.release_title,
                id
            );
        }
    }
}

#[async_trait]
impl ImageVault for LxdImageVault {
    async fn fetch_image(
        &self,
        _fetch_type: FetchType,
        query: &Query,
        _prepare: &PrepareAction,
        monitor: &ProgressMonitor,
    ) -> Result<VMImage> {
        // TODO: support http/file image sources once the daemon-side import
        // path for them is wired up.
        if query.query_type != QueryType::Alias && !platform::is_image_url_supported() {
            return Err(Error::UnsupportedImageSource);
        }

        self.log_existing_image(&query.name).await;

        let info = self.registry.info_for(query).await?;
        let image = VMImage::from_info(&info);

        let image_url = format!("{}/images/{}", self.base_url, info.id);
        match self.transport.request("GET", &image_url, None, None).await? {
            RemoteResponse::Found(_) => {
                tracing::debug!("image {} already present, skipping pull", info.id);
            }
            RemoteResponse::NotFound => {
                let body = json!({
                    "source": {
                        "type": "image",
                        "mode": "pull",
                        "server": info.stream_location,
                        "protocol": "simplestreams",
                        "fingerprint": info.id
                    }
                });

                let url = format!("{}/images", self.base_url);
                let reply = expect_found(
                    "POST",
                    &url,
                    self.transport.request("POST", &url, Some(body), None).await?,
                )?;

                if let Some(op) = operations::spawned_task(&self.base_url, &reply) {
                    operations::poll_with_progress(self.transport.as_ref(), &op, monitor).await?;
                }
            }
        }

        Ok(image)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        match self
            .transport
            .request("DELETE", &self.instance_url(name), None, None)
            .await?
        {
            RemoteResponse::Found(_) => Ok(()),
            RemoteResponse::NotFound => {
                tracing::warn!("instance \"{}\" does not exist: not removing", name);
                Ok(())
            }
        }
    }

    async fn has_record_for(&self, name: &str) -> Result<bool> {
        match self
            .transport
            .request("GET", &self.instance_url(name), None, None)
            .await?
        {
            RemoteResponse::Found(_) => Ok(true),
            RemoteResponse::NotFound => Ok(false),
        }
    }

    async fn prune_expired_images(&self) -> Result<()> {
        // The daemon owns image lifetime and expires unused images itself.
        Ok(())
    }

    async fn update_images(
        &self,
        _fetch_type: FetchType,
        _prepare: &PrepareAction,
        _monitor: &ProgressMonitor,
    ) -> Result<()> {
        // Catalog refresh is likewise the daemon's business.
        Ok(())
    }
}
