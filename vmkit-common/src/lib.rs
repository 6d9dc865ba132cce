use serde::{Deserialize, Serialize};

pub mod error;

pub use error::{Error, Result};

// --- Enums ---

/// Lifecycle state of a managed instance, as seen by the driver.
///
/// Exactly one value at a time per instance. `DelayedShutdown` means a stop
/// was requested but the remote has not yet reported non-running; `Unknown`
/// covers cancelling/aborting remotes and unrecognized status codes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Off,
    Starting,
    Running,
    Stopped,
    Suspending,
    Suspended,
    DelayedShutdown,
    Unknown,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Off => "off",
            InstanceState::Starting => "starting",
            InstanceState::Running => "running",
            InstanceState::Stopped => "stopped",
            InstanceState::Suspending => "suspending",
            InstanceState::Suspended => "suspended",
            InstanceState::DelayedShutdown => "delayed_shutdown",
            InstanceState::Unknown => "unknown",
        }
    }
}

/// What a vault is asked to download for an image.
///
/// This backend only ever needs the image itself; the kernel/initrd variant
/// exists for vault implementations backed by local hypervisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchType {
    ImageOnly,
    ImageKernelAndInitrd,
}

/// How the user expressed an image request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Alias,
    HttpDownload,
    LocalFile,
}

/// Progress phase tag passed to a `ProgressMonitor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPhase {
    Image,
}

// --- Image metadata ---

/// A user's image request: a release string plus an optional remote catalog
/// name scoping the lookup. `name` is the instance the image is destined for.
#[derive(Debug, Clone)]
pub struct Query {
    pub name: String,
    pub release: String,
    pub remote_name: Option<String>,
    pub query_type: QueryType,
}

/// Image metadata as served by a catalog lookup. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Content fingerprint identifying the image on the remote.
    pub id: String,
    /// Simplestreams index the image can be pulled from.
    pub stream_location: String,
    pub release_title: String,
    pub version: String,
    pub aliases: Vec<String>,
}

/// A concrete, launchable image reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VMImage {
    pub id: String,
    pub stream_location: String,
    pub original_release: String,
    pub release_date: String,
    pub aliases: Vec<String>,
}

impl VMImage {
    pub fn from_info(info: &ImageInfo) -> Self {
        Self {
            id: info.id.clone(),
            stream_location: info.stream_location.clone(),
            original_release: info.release_title.clone(),
            release_date: info.version.clone(),
            aliases: info.aliases.clone(),
        }
    }
}

// --- Instance description ---

/// Everything needed to create an instance, supplied once at construction.
///
/// Cloud-init documents are pre-rendered YAML; empty/absent documents are
/// omitted from the create request.
#[derive(Debug, Clone)]
pub struct VirtualMachineDescription {
    pub vm_name: String,
    pub ssh_username: String,
    pub num_cores: u32,
    pub mem_size_bytes: u64,
    pub disk_size_bytes: u64,
    pub meta_data_config: Option<String>,
    pub vendor_data_config: Option<String>,
    pub user_data_config: Option<String>,
    pub image: VMImage,
}

// --- Collaborators ---

/// Persists authoritative state changes so the tool survives restarts.
/// Invoked on every authoritative local state change.
pub trait VmStatusMonitor: Send + Sync {
    fn persist_state_for(&self, instance_name: &str, state: InstanceState);
}

/// Download progress callback: receives the phase and a percentage
/// (-1 when the remote reports no parsable progress). Returning `false`
/// aborts the download.
pub type ProgressMonitor = dyn Fn(LaunchPhase, i32) -> bool + Send + Sync;

/// Hook run between resolving an image and handing it to the caller.
/// This backend accepts it for interface compatibility but the remote daemon
/// prepares images itself, so implementations may ignore it.
pub type PrepareAction = dyn Fn(&VMImage) -> VMImage + Send + Sync;
