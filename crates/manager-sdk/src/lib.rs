//! Asynchronous client for the orchestration manager's REST API.
//!
//! Covers the blueprint, deployment and execution resources the deploy tool
//! drives, and hides token authentication, tenant scoping and retry of
//! transient faults behind the [`ManagerApi`] trait. [`memory::InMemoryManager`]
//! implements the same trait in-process for tests.

mod api;
mod client;
mod connection;
mod error;
pub mod memory;
pub mod retry;
mod types;

pub use api::ManagerApi;
pub use client::ManagerClient;
pub use connection::{
    parse_flag, parse_timeout, resolve, validate_resource_id, ConfigError, ConnectionConfig,
    ConnectionParams, DEFAULT_API_VERSION, DEFAULT_REQUEST_TIMEOUT,
};
pub use error::{ClientError, PermanentKind};
pub use retry::{with_retry, RetryPolicy};
pub use types::{
    BlueprintUpload, Deployment, DeploymentSpec, Execution, ExecutionStatus, Inputs,
};
