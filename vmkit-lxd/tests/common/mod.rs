// Shared test doubles for driving the backend against a scripted daemon.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use vmkit_common::{
    Error, InstanceState, Result, VMImage, VirtualMachineDescription, VmStatusMonitor,
};
use vmkit_lxd::{RemoteResponse, Transport};

pub const BASE: &str = "https://lxd.test/1.0";

pub const GIB: u64 = 1024 * 1024 * 1024;

/// One scripted reply slot.
#[derive(Clone)]
pub enum Reply {
    Found(Value),
    NotFound,
    Fail(u16, &'static str),
}

#[derive(Clone)]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    pub body: Option<Value>,
}

/// Transport double.
///
/// Replies are scripted per (method, path); queues replay in order and the
/// last entry is sticky so state polls can repeat. Every request is recorded
/// for assertions. Unscripted requests panic: a test that makes one has a
/// bug.
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    log: Mutex<Vec<RequestRecord>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, method: &str, path: &str, reply: Reply) {
        let key = format!("{} {}{}", method, BASE, path);
        self.replies
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        let url = format!("{}{}", BASE, path);
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    /// Body of the first recorded request matching (method, path).
    pub fn body_of(&self, method: &str, path: &str) -> Option<Value> {
        let url = format!("{}{}", BASE, path);
        self.log
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.method == method && r.url == url)
            .and_then(|r| r.body.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(
        &self,
        method: &str,
        url: &str,
        body: Option<Value>,
        _timeout: Option<Duration>,
    ) -> Result<RemoteResponse> {
        self.log.lock().unwrap().push(RequestRecord {
            method: method.to_string(),
            url: url.to_string(),
            body,
        });

        let key = format!("{} {}", method, url);
        let mut replies = self.replies.lock().unwrap();
        let queue = replies
            .get_mut(&key)
            .unwrap_or_else(|| panic!("unscripted request: {}", key));

        let reply = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| panic!("script for {} exhausted", key))
        };

        match reply {
            Reply::Found(value) => Ok(RemoteResponse::Found(value)),
            Reply::NotFound => Ok(RemoteResponse::NotFound),
            Reply::Fail(status, body) => Err(Error::RemoteFailure {
                url: url.to_string(),
                status,
                body: body.to_string(),
            }),
        }
    }
}

/// Status monitor double recording every persisted state.
pub struct RecordingMonitor {
    states: Mutex<Vec<(String, InstanceState)>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(Vec::new()),
        }
    }

    pub fn states(&self) -> Vec<InstanceState> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .map(|(_, state)| *state)
            .collect()
    }

    pub fn last(&self) -> Option<InstanceState> {
        self.states().last().copied()
    }
}

impl VmStatusMonitor for RecordingMonitor {
    fn persist_state_for(&self, instance_name: &str, state: InstanceState) {
        self.states
            .lock()
            .unwrap()
            .push((instance_name.to_string(), state));
    }
}

// --- reply builders ---

pub fn state_reply(status: &str, status_code: i64) -> Reply {
    Reply::Found(json!({
        "metadata": { "status": status, "status_code": status_code }
    }))
}

/// State reply carrying network addresses; the IPv6 one comes first to make
/// sure family filtering is exercised.
pub fn state_reply_with_ip(status: &str, status_code: i64, ip: &str) -> Reply {
    Reply::Found(json!({
        "metadata": {
            "status": status,
            "status_code": status_code,
            "network": {
                "eth0": {
                    "addresses": [
                        { "family": "inet6", "address": "fe80::216:3eff:fe00:1" },
                        { "family": "inet", "address": ip }
                    ]
                }
            }
        }
    }))
}

/// Mutation accepted as a background task.
pub fn task_reply(id: &str) -> Reply {
    Reply::Found(json!({
        "status_code": 100,
        "metadata": { "class": "task", "id": id, "status_code": 103 }
    }))
}

/// Mutation answered synchronously (no task spawned).
pub fn sync_reply() -> Reply {
    Reply::Found(json!({ "status_code": 200, "metadata": {} }))
}

pub fn op_running(progress: &str) -> Reply {
    Reply::Found(json!({
        "error_code": 0,
        "metadata": {
            "status_code": 103,
            "metadata": { "download_progress": progress }
        }
    }))
}

pub fn op_success() -> Reply {
    Reply::Found(json!({
        "error_code": 0,
        "metadata": { "status_code": 200 }
    }))
}

pub fn desc(name: &str, disk_size_bytes: u64) -> VirtualMachineDescription {
    VirtualMachineDescription {
        vm_name: name.to_string(),
        ssh_username: "ubuntu".to_string(),
        num_cores: 2,
        mem_size_bytes: 2 * GIB,
        disk_size_bytes,
        meta_data_config: Some(format!("instance-id: {}\n", name)),
        vendor_data_config: None,
        user_data_config: Some(String::new()),
        image: VMImage {
            id: "fedcba9876543210".to_string(),
            stream_location: "https://images.example.net/releases".to_string(),
            original_release: "24.04 LTS".to_string(),
            release_date: "20260801".to_string(),
            aliases: vec!["noble".to_string()],
        },
    }
}
