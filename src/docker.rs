use crate::config::Config;
use crate::image_reference::ImageReference;
use crate::runtime::{ContainerInfo, ContainerRuntime, ContainerStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{ListContainersOptions, RestartContainerOptions};
use bollard::image::CreateImageOptions;
use bollard::models::ContainerSummary;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// [`ContainerRuntime`] backed by the local Docker Engine API.
///
/// `bollard::Docker` is a cheap handle over a pooled connection and is safe to call
/// from many tasks at once, so no lock is taken around runtime calls.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    credentials: HashMap<String, DockerCredentials>,
}

impl DockerRuntime {
    /// Connects via `DOCKER_HOST` or the default local socket and verifies the daemon answers.
    pub async fn connect(config: &Config) -> Result<Self> {
        info!("Initializing Docker client");
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to create Docker client from local defaults")?;
        docker
            .ping()
            .await
            .context("Docker daemon is not reachable")?;
        let version = docker
            .version()
            .await
            .context("Failed to query Docker daemon version")?;
        info!(
            "Connected to Docker daemon with version {} (API {})",
            version.version.as_deref().unwrap_or("unknown"),
            version.api_version.as_deref().unwrap_or("unknown")
        );

        Ok(Self {
            docker,
            credentials: registry_credentials(config),
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running_containers(&self) -> Result<Vec<ContainerInfo>> {
        let filters = HashMap::from([("status", vec!["running"])]);
        let options = ListContainersOptions {
            all: false,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .context("Failed to list running containers")?;

        debug!("Docker reported {} running containers", summaries.len());

        Ok(summaries.into_iter().filter_map(container_info).collect())
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        let image_reference = ImageReference::parse(reference)
            .with_context(|| format!("Cannot pull invalid image reference {}", reference))?;
        let credentials = self.credentials.get(&image_reference.registry).cloned();

        info!(
            "Pulling image {} from registry {} ({})",
            image_reference,
            image_reference.registry,
            match credentials {
                Some(_) => "authenticated",
                None => "anonymous",
            }
        );

        let options = CreateImageOptions {
            from_image: image_reference.name.as_str(),
            tag: image_reference.tag.as_str(),
            ..Default::default()
        };

        let mut stream = std::pin::pin!(self.docker.create_image(Some(options), None, credentials));
        while let Some(progress) = stream.next().await {
            let progress =
                progress.with_context(|| format!("Failed to pull image {}", image_reference))?;
            if let Some(error) = progress.error {
                anyhow::bail!("Failed to pull image {}: {}", image_reference, error);
            }
            if let Some(status) = progress.status {
                match progress.id {
                    Some(layer) => debug!("Pull {}: {} {}", image_reference, layer, status),
                    None => debug!("Pull {}: {}", image_reference, status),
                }
            }
        }

        Ok(())
    }

    async fn restart_container(&self, id: &str, timeout_seconds: u32) -> Result<()> {
        let options = RestartContainerOptions {
            t: isize::try_from(timeout_seconds).unwrap_or(isize::MAX),
        };
        self.docker
            .restart_container(id, Some(options))
            .await
            .with_context(|| format!("Failed to restart container {}", id))
    }
}

fn container_info(summary: ContainerSummary) -> Option<ContainerInfo> {
    let Some(id) = summary.id else {
        warn!("Skipping container without id in Docker listing");
        return None;
    };
    Some(ContainerInfo {
        id,
        image: summary.image.unwrap_or_default(),
        status: ContainerStatus::from_state(summary.state.as_deref().unwrap_or_default()),
    })
}

fn registry_credentials(config: &Config) -> HashMap<String, DockerCredentials> {
    config
        .registries
        .iter()
        .map(|registry| {
            let credentials = DockerCredentials {
                username: registry.username.clone(),
                password: Some(registry.token.expose_secret().to_owned()),
                serveraddress: Some(registry.hostname.clone()),
                ..Default::default()
            };
            (registry.hostname.clone(), credentials)
        })
        .collect()
}
