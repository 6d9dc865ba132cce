use anyhow::Result;
use async_trait::async_trait;

use vmkit_common::{
    FetchType, ImageInfo, PrepareAction, ProgressMonitor, Query, VMImage,
};

pub mod platform;
pub mod registry;

pub use registry::ImageHostRegistry;

/// A pluggable source of image metadata for one or more named "remotes".
///
/// Hosts only answer metadata questions; actually materializing an image is
/// the vault's job.
#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Remote catalog names this host serves (e.g. "release", "daily").
    fn supported_remotes(&self) -> Vec<String>;

    /// Look up a query; `None` means "this host has no match", which lets
    /// the registry fall through to the next host.
    async fn info_for(&self, query: &Query) -> Result<Option<ImageInfo>>;

    /// Reverse lookup by exact fingerprint.
    async fn info_for_full_hash(&self, full_hash: &str) -> Result<ImageInfo>;
}

/// Image store interface shared by all backends.
///
/// Backends where the remote daemon owns image lifetime implement pruning
/// and refresh as no-ops but must still expose them.
#[async_trait]
pub trait ImageVault: Send + Sync {
    async fn fetch_image(
        &self,
        fetch_type: FetchType,
        query: &Query,
        prepare: &PrepareAction,
        monitor: &ProgressMonitor,
    ) -> vmkit_common::Result<VMImage>;

    /// Delete the record for `name`, tolerating absence.
    async fn remove(&self, name: &str) -> vmkit_common::Result<()>;

    /// Pure existence probe.
    async fn has_record_for(&self, name: &str) -> vmkit_common::Result<bool>;

    async fn prune_expired_images(&self) -> vmkit_common::Result<()>;

    async fn update_images(
        &self,
        fetch_type: FetchType,
        prepare: &PrepareAction,
        monitor: &ProgressMonitor,
    ) -> vmkit_common::Result<()>;
}

#[cfg(any(test, feature = "mock"))]
pub mod mock;
