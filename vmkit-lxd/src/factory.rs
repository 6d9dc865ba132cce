use std::sync::Arc;

use vmkit_common::{Error, FetchType, Result, VirtualMachineDescription, VmStatusMonitor};
use vmkit_images::ImageHost;

use crate::machine::LxdVirtualMachine;
use crate::transport::{HttpTransport, RemoteResponse, Transport};
use crate::vault::LxdImageVault;

/// Where the daemon's API root lives unless configured otherwise.
pub const DEFAULT_BASE_URL: &str = "https://127.0.0.1:8443/1.0";

const BASE_URL_ENV: &str = "VMKIT_LXD_URL";

/// Entry point for the backend: bundles the transport and base URL and hands
/// out machines and vaults wired to the same daemon.
pub struct LxdBackend {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl LxdBackend {
    pub fn new(transport: Arc<dyn Transport>, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Configure from the environment (`VMKIT_LXD_URL`), falling back to the
    /// default local listener.
    pub fn from_env() -> Self {
        let base_url = std::env::var(BASE_URL_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self::new(Arc::new(HttpTransport::new()), &base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn fetch_type(&self) -> FetchType {
        FetchType::ImageOnly
    }

    pub async fn create_virtual_machine(
        &self,
        desc: &VirtualMachineDescription,
        monitor: Arc<dyn VmStatusMonitor>,
    ) -> Result<LxdVirtualMachine> {
        LxdVirtualMachine::new(desc, monitor, Arc::clone(&self.transport), &self.base_url).await
    }

    pub fn make_image_vault(&self, image_hosts: Vec<Arc<dyn ImageHost>>) -> LxdImageVault {
        LxdImageVault::new(image_hosts, Arc::clone(&self.transport), &self.base_url)
    }

    /// Delete everything the daemon holds for `name`; absence is benign.
    pub async fn remove_resources_for(&self, name: &str) -> Result<()> {
        let url = format!("{}/virtual-machines/{}", self.base_url, name);
        match self.transport.request("DELETE", &url, None, None).await? {
            RemoteResponse::Found(_) => Ok(()),
            RemoteResponse::NotFound => {
                tracing::debug!("no resources for \"{}\" on the remote", name);
                Ok(())
            }
        }
    }

    /// Verify the daemon is reachable and answering on its API root.
    pub async fn hypervisor_health_check(&self) -> Result<()> {
        match self
            .transport
            .request("GET", &self.base_url, None, None)
            .await?
        {
            RemoteResponse::Found(_) => Ok(()),
            RemoteResponse::NotFound => Err(Error::RequestFailed {
                method: "GET".to_string(),
                url: self.base_url.clone(),
                detail: "API root not found; is this the right daemon?".to_string(),
            }),
        }
    }
}
