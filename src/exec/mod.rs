// src/exec/mod.rs

//! Execution-side collaborators.
//!
//! - [`remote`] is the contract with a remote execution resource
//!   ([`RemoteExecutor`]) and the work-area naming shared by every task.
//! - [`sync`] moves named data items between central storage and the
//!   resource-local cache ([`DataSync`]).
//! - [`local`] implements a resource on the local machine with
//!   `tokio::process`.
//! - [`monitor`] runs detached activities that follow a remote job and
//!   write its progress back to the task.

pub mod local;
pub mod monitor;
pub mod remote;
pub mod sync;

pub use local::LocalExecutor;
pub use monitor::{apply_remote_state, MonitorRegistry};
pub use remote::{
    BoxFuture, JobControl, JobRequest, RemoteExecutor, RemoteState, ResourceCapabilities, WorkArea,
};
pub use sync::{DataSync, LocalSync};
