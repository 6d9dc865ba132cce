//! Driver for operating virtual machines through a remote hypervisor daemon
//! with an asynchronous, task-based JSON-over-HTTP API.
//!
//! The daemon answers mutations either synchronously or with an "operation"
//! handle that must be polled to completion; this crate maps that
//! eventually-consistent surface onto the synchronous lifecycle calls the
//! rest of the tool expects (`start`, `stop`, `ssh_hostname`, image fetch).

pub mod factory;
pub mod machine;
pub mod operations;
pub mod state;
pub mod transport;
pub mod vault;

pub use factory::{LxdBackend, DEFAULT_BASE_URL};
pub use machine::LxdVirtualMachine;
pub use transport::{HttpTransport, RemoteResponse, Transport};
pub use vault::LxdImageVault;
