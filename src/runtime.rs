//! The narrow view of the container runtime the reconciler works against.

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Other,
}

impl ContainerStatus {
    pub fn from_state(state: &str) -> Self {
        match state {
            "running" => ContainerStatus::Running,
            _ => ContainerStatus::Other,
        }
    }
}

/// Point-in-time view of one container, valid for a single reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    /// Image the container was created from, as the runtime reports it (e.g. `acme/app:latest`)
    pub image: String,
    pub status: ContainerStatus,
}

/// Container runtime operations.
///
/// Implementations are shared by every in-flight request and must tolerate concurrent calls.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers, filtered by the runtime itself to those in the running state.
    async fn list_running_containers(&self) -> Result<Vec<ContainerInfo>>;

    /// Pull `reference` into the local image store.
    async fn pull_image(&self, reference: &str) -> Result<()>;

    /// Restart a container, waiting up to `timeout_seconds` for a graceful stop before killing it.
    async fn restart_container(&self, id: &str, timeout_seconds: u32) -> Result<()>;
}
