use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use vmkit_common::{Error, InstanceState, Result, VirtualMachineDescription, VmStatusMonitor};

use crate::operations;
use crate::state::{state_for_status_code, StateCell};
use crate::transport::{expect_found, RemoteResponse, Transport, STATE_REQUEST_TIMEOUT};

/// SSH port is fixed for this backend; the daemon does not negotiate one.
pub const SSH_PORT: u16 = 22;

const IP_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const IP_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(120);

/// The daemon rejects root disks smaller than this.
const MIN_ROOT_DISK_BYTES: u64 = 10 * 1024 * 1024 * 1024;

fn min_root_disk_size(requested_bytes: u64) -> u64 {
    requested_bytes.max(MIN_ROOT_DISK_BYTES)
}

/// One remotely-backed virtual machine.
///
/// Owns the locally cached lifecycle state and drives creation, start/stop
/// transitions and IP discovery against the daemon. Constructing one is
/// create-on-demand: if the remote has no record for the name, the instance
/// is created from the description first.
///
/// The state cell lives inside a watch channel: every authoritative write is
/// published, so a `stop()` racing a settling `start()` can simply subscribe
/// and wait for a terminal state instead of sharing a condvar.
pub struct LxdVirtualMachine {
    name: String,
    username: String,
    monitor: Arc<dyn VmStatusMonitor>,
    transport: Arc<dyn Transport>,
    base_url: String,
    state_tx: watch::Sender<StateCell>,
    ip: tokio::sync::Mutex<Option<String>>,
}

impl LxdVirtualMachine {
    pub async fn new(
        desc: &VirtualMachineDescription,
        monitor: Arc<dyn VmStatusMonitor>,
        transport: Arc<dyn Transport>,
        base_url: &str,
    ) -> Result<Self> {
        let (state_tx, _) = watch::channel(StateCell::new(InstanceState::Unknown));
        let vm = Self {
            name: desc.vm_name.clone(),
            username: desc.ssh_username.clone(),
            monitor,
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            state_tx,
            ip: tokio::sync::Mutex::new(None),
        };

        match vm.fetch_remote_state().await? {
            Some(remote) => {
                vm.commit_remote(remote);
            }
            None => {
                tracing::debug!(
                    "{}: creating instance with stream: {}, id: {}",
                    vm.name,
                    desc.image.stream_location,
                    desc.image.id
                );
                vm.create(desc).await?;
                // Establish the authoritative starting value.
                vm.current_state().await?;
            }
        }

        Ok(vm)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ssh_username(&self) -> &str {
        &self.username
    }

    pub fn ssh_port(&self) -> u16 {
        SSH_PORT
    }

    /// The locally cached state, without consulting the remote.
    pub fn cached_state(&self) -> InstanceState {
        self.state_tx.borrow().effective()
    }

    /// Re-read the remote state and commit it under the read-precedence
    /// rule: a settling local `start` and a scheduled delayed shutdown are
    /// not overwritten by a remote that has not converged yet; every other
    /// observation overwrites the cache and is persisted.
    pub async fn current_state(&self) -> Result<InstanceState> {
        let remote = self
            .fetch_remote_state()
            .await?
            .ok_or_else(|| Error::InstanceMissing {
                name: self.name.clone(),
            })?;
        Ok(self.commit_remote(remote))
    }

    pub async fn start(&self) -> Result<()> {
        let present = self.current_state().await?;

        if present == InstanceState::Running {
            return Ok(());
        }

        if present == InstanceState::Suspending {
            return Err(Error::InvalidOperation(
                "cannot start the instance while suspending".to_string(),
            ));
        }

        if present == InstanceState::Suspended {
            tracing::info!("{}: resuming from a suspended state", self.name);
            self.request_state_change("unfreeze").await?;
        } else {
            self.request_state_change("start").await?;
        }

        self.request_transition(InstanceState::Starting);
        self.update_state();
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        // Already observed down: a repeat stop must not touch the remote.
        if self.cached_state() == InstanceState::Stopped {
            return Ok(());
        }

        let present = self.current_state().await?;

        match present {
            InstanceState::Running | InstanceState::DelayedShutdown => {
                let reply = self.request_state_change("stop").await?;
                if let Some(op) = operations::spawned_task(&self.base_url, &reply) {
                    operations::wait_for_completion(self.transport.as_ref(), &op).await?;
                }
                self.force_state(InstanceState::Stopped);
                self.clear_ip().await;
            }
            InstanceState::Starting => {
                // Park the cell on the stop sentinel so whoever is settling
                // the start observes the abort and publishes a terminal
                // state for us to pick up.
                self.force_state(InstanceState::Off);
                self.request_state_change("stop").await?;

                let mut rx = self.state_tx.subscribe();
                let _ = rx
                    .wait_for(|cell| cell.effective() == InstanceState::Stopped)
                    .await;
                self.clear_ip().await;
            }
            InstanceState::Suspended => {
                tracing::info!("{}: ignoring shutdown issued while suspended", self.name);
            }
            _ => {}
        }

        self.update_state();
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.stop().await
    }

    pub async fn suspend(&self) -> Result<()> {
        Err(Error::InvalidOperation(
            "suspend is currently not supported".to_string(),
        ))
    }

    /// Record that a deferred stop has been scheduled: the instance keeps
    /// running remotely but reports `DelayedShutdown` locally until the stop
    /// lands (or is cancelled by an overwriting observation).
    pub fn mark_delayed_shutdown(&self) {
        self.request_transition(InstanceState::DelayedShutdown);
        self.update_state();
    }

    /// Resolve an SSH-reachable address, retrying for up to two minutes.
    ///
    /// Fails fast with `Error::StartAborted` if the instance goes down while
    /// we wait, and with `Error::IpTimeout` once the bound is exhausted.
    pub async fn ssh_hostname(&self) -> Result<String> {
        if let Some(ip) = self.ip.lock().await.clone() {
            return Ok(ip);
        }

        let deadline = Instant::now() + IP_DISCOVERY_TIMEOUT;
        loop {
            self.ensure_vm_is_running().await?;

            if let Some(ip) = self.fetch_ip().await? {
                *self.ip.lock().await = Some(ip.clone());
                return Ok(ip);
            }

            if Instant::now() >= deadline {
                return Err(Error::IpTimeout {
                    name: self.name.clone(),
                });
            }
            sleep(IP_RETRY_INTERVAL).await;
        }
    }

    /// Single non-retrying lookup; "UNKNOWN" when no address is assigned yet.
    pub async fn ipv4(&self) -> Result<String> {
        if let Some(ip) = self.ip.lock().await.clone() {
            return Ok(ip);
        }

        match self.fetch_ip().await? {
            Some(ip) => {
                *self.ip.lock().await = Some(ip.clone());
                Ok(ip)
            }
            None => Ok("UNKNOWN".to_string()),
        }
    }

    /// IPv6 is not supported by this backend.
    pub fn ipv6(&self) -> String {
        String::new()
    }

    // -- internals --

    fn url(&self) -> String {
        format!("{}/virtual-machines/{}", self.base_url, self.name)
    }

    fn state_url(&self) -> String {
        format!("{}/state", self.url())
    }

    async fn create(&self, desc: &VirtualMachineDescription) -> Result<()> {
        let mut config = serde_json::Map::new();
        config.insert("limits.cpu".into(), json!(desc.num_cores.to_string()));
        config.insert(
            "limits.memory".into(),
            json!(desc.mem_size_bytes.to_string()),
        );

        for (key, doc) in [
            ("user.meta-data", &desc.meta_data_config),
            ("user.vendor-data", &desc.vendor_data_config),
            ("user.user-data", &desc.user_data_config),
        ] {
            if let Some(doc) = doc {
                if !doc.trim().is_empty() {
                    config.insert(key.into(), json!(doc));
                }
            }
        }

        let body = json!({
            "name": self.name,
            "config": config,
            "devices": {
                "config": { "source": "cloud-init:config", "type": "disk" },
                "root": {
                    "path": "/",
                    "pool": "default",
                    "size": min_root_disk_size(desc.disk_size_bytes).to_string(),
                    "type": "disk"
                }
            },
            "source": {
                "type": "image",
                "mode": "pull",
                "server": desc.image.stream_location,
                "protocol": "simplestreams",
                "fingerprint": desc.image.id
            }
        });

        let url = format!("{}/virtual-machines", self.base_url);
        let reply = expect_found(
            "POST",
            &url,
            self.transport.request("POST", &url, Some(body), None).await?,
        )?;
        tracing::trace!("{}: got creation reply: {}", self.name, reply);

        if let Some(op) = operations::spawned_task(&self.base_url, &reply) {
            // Fire and forget: a failed creation surfaces through the state
            // re-read that follows.
            match operations::poll_to_completion(self.transport.as_ref(), &op).await {
                Ok(()) => {}
                Err(Error::OperationFailed { id, status }) => {
                    tracing::warn!("{}: create operation {} reported: {}", self.name, id, status);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    async fn fetch_remote_state(&self) -> Result<Option<InstanceState>> {
        match self
            .transport
            .request("GET", &self.state_url(), None, None)
            .await?
        {
            RemoteResponse::NotFound => Ok(None),
            RemoteResponse::Found(reply) => {
                let metadata = &reply["metadata"];
                tracing::trace!(
                    "{}: remote reports state {}",
                    self.name,
                    metadata["status"].as_str().unwrap_or("?")
                );
                Ok(Some(state_for_status_code(
                    &self.name,
                    metadata["status_code"].as_i64().unwrap_or(-1),
                    metadata["status"].as_str().unwrap_or(""),
                )))
            }
        }
    }

    /// First IPv4 ("inet" family) address on the primary interface, with any
    /// CIDR suffix stripped.
    async fn fetch_ip(&self) -> Result<Option<String>> {
        let reply = match self
            .transport
            .request("GET", &self.state_url(), None, None)
            .await?
        {
            RemoteResponse::NotFound => return Ok(None),
            RemoteResponse::Found(reply) => reply,
        };

        if let Some(addresses) = reply["metadata"]["network"]["eth0"]["addresses"].as_array() {
            for address in addresses {
                if address["family"].as_str() == Some("inet") {
                    if let Some(ip) = address["address"].as_str() {
                        let ip = ip.split('/').next().unwrap_or(ip);
                        if !ip.is_empty() {
                            return Ok(Some(ip.to_string()));
                        }
                    }
                }
            }
        }

        tracing::trace!("{}: IP not found yet", self.name);
        Ok(None)
    }

    async fn request_state_change(&self, action: &str) -> Result<Value> {
        let url = self.state_url();
        let reply = self
            .transport
            .request(
                "PUT",
                &url,
                Some(json!({ "action": action })),
                Some(STATE_REQUEST_TIMEOUT),
            )
            .await?;
        expect_found("PUT", &url, reply)
    }

    /// Readiness guard: bail out if the instance went down underneath a
    /// settling start, publishing `Stopped` so a blocked `stop()` caller has
    /// a terminal state to observe.
    async fn ensure_vm_is_running(&self) -> Result<()> {
        // A concurrent stop() parks the cell on `Off`; anything else
        // warrants a fresh remote read.
        let present = if self.cached_state() == InstanceState::Off {
            InstanceState::Off
        } else {
            self.current_state().await?
        };

        if present == InstanceState::Off {
            self.force_state(InstanceState::Stopped);
            self.update_state();
            return Err(Error::StartAborted {
                name: self.name.clone(),
            });
        }

        Ok(())
    }

    fn commit_remote(&self, remote: InstanceState) -> InstanceState {
        let mut committed = (remote, false);
        self.state_tx
            .send_modify(|cell| committed = cell.commit(remote));

        let (state, overwrote) = committed;
        if overwrote {
            self.monitor.persist_state_for(&self.name, state);
        }
        state
    }

    fn force_state(&self, state: InstanceState) {
        self.state_tx.send_modify(|cell| {
            cell.observed = state;
            cell.requested = None;
        });
    }

    fn request_transition(&self, state: InstanceState) {
        self.state_tx
            .send_modify(|cell| cell.requested = Some(state));
    }

    fn update_state(&self) {
        self.monitor.persist_state_for(&self.name, self.cached_state());
    }

    async fn clear_ip(&self) {
        // Addresses are not stable across restarts.
        *self.ip.lock().await = None;
    }
}
