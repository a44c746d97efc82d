// SPDX-License-Identifier: Apache-2.0

//! Container lifecycle against the Docker API, behind the
//! [`ContainerRuntime`] seam so [`crate::application::topology_manager::TopologyManager`]
//! can be exercised without a live daemon.
//!
//! Grounded on the reference orchestrator's `infrastructure::runtime::DockerRuntime`
//! for the bollard wiring idiom, and on `core.py::Blockade::_start_container`/
//! `_get_all_containers` for what a blockade container actually needs.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions,
    RemoveContainerOptions, RestartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::service::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

use crate::domain::container::ContainerConfig;
use crate::domain::errors::BlockadeError;

/// What [`ContainerRuntime::inspect`] reports about one container.
#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub running: bool,
    pub ip_address: Option<String>,
}

/// Seam around the Docker API for container lifecycle operations a
/// topology needs. A thin wrapper, not a general Docker client — it only
/// exposes what the Topology Manager uses.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container for `config`, under
    /// `container_name`. `network_mode`, when given, is a user-defined
    /// network name the container should be attached to instead of the
    /// default bridge (the `udn` network driver; see
    /// `crate::domain::config::NetworkDriver`).
    async fn create(
        &self,
        config: &ContainerConfig,
        container_name: &str,
        network_mode: Option<&str>,
        blockade_id: &str,
    ) -> Result<String, BlockadeError>;
    async fn start(&self, id: &str) -> Result<(), BlockadeError>;
    async fn stop(&self, id: &str) -> Result<(), BlockadeError>;
    async fn restart(&self, id: &str) -> Result<(), BlockadeError>;
    async fn kill(&self, id: &str, signal: &str) -> Result<(), BlockadeError>;
    async fn remove(&self, id: &str) -> Result<(), BlockadeError>;
    async fn inspect(&self, id: &str) -> Result<Option<RuntimeStatus>, BlockadeError>;
    async fn logs(&self, id: &str, tail: Option<u64>) -> Result<String, BlockadeError>;
    /// `docker exec` a command inside the container and return its stdout,
    /// erroring on non-zero exit. Used by the Interface Resolver to read
    /// `/sys/class/net/eth0/ifindex`.
    async fn exec(&self, id: &str, argv: &[&str]) -> Result<String, BlockadeError>;
    /// Create the named user-defined bridge network if it doesn't already
    /// exist (idempotent), for the `udn` network driver.
    async fn ensure_network(&self, name: &str) -> Result<(), BlockadeError>;
    /// Remove the named network. Idempotent: a missing network is not an
    /// error.
    async fn remove_network(&self, name: &str) -> Result<(), BlockadeError>;
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, BlockadeError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            BlockadeError::ConfigError(format!(
                "could not connect to the Docker daemon: {e}\n\n\
                 Common causes:\n\
                 - the Docker daemon isn't running\n\
                 - DOCKER_HOST points at a socket this process can't reach\n\
                 - this process lacks permission to access the Docker socket"
            ))
        })?;
        Ok(DockerRuntime { docker })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), BlockadeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        info!(%image, "pulling image");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| BlockadeError::Other(e.into()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(
        &self,
        config: &ContainerConfig,
        container_name: &str,
        network_mode: Option<&str>,
        blockade_id: &str,
    ) -> Result<String, BlockadeError> {
        self.ensure_image(&config.image).await?;

        // `config.publish_ports` is keyed by host port with the
        // container-side port as the value (§3's "host→container" mapping);
        // the Docker API wants the reverse, container-port-keyed shape.
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for (host_port, container_port) in &config.publish_ports {
            port_bindings.insert(
                format!("{container_port}/tcp"),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.clone()),
                }]),
            );
        }

        let binds: Vec<String> = config
            .volumes
            .iter()
            .map(|(host, container)| format!("{host}:{container}"))
            .collect();

        // Only meaningful on the default bridge network; a udn-attached
        // container is reachable by its own container name instead.
        let links: Vec<String> = if network_mode.is_none() {
            config.links.iter().map(|l| format!("{}:{}", l.name, l.alias)).collect()
        } else {
            Vec::new()
        };

        let env: Vec<String> = config
            .environment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            links: if links.is_empty() { None } else { Some(links) },
            port_bindings: if port_bindings.is_empty() { None } else { Some(port_bindings) },
            privileged: Some(config.privileged),
            cap_add: if config.cap_add.is_empty() {
                None
            } else {
                Some(config.cap_add.clone())
            },
            dns: if config.dns.is_empty() { None } else { Some(config.dns.clone()) },
            network_mode: network_mode.map(|n| n.to_string()),
            ..Default::default()
        };

        let mut labels = HashMap::new();
        labels.insert("blockade.id".to_string(), blockade_id.to_string());

        let container_config = Config {
            image: Some(config.image.clone()),
            hostname: config.hostname.clone(),
            cmd: config.command.as_ref().map(|c| vec![c.clone()]),
            env: if env.is_empty() { None } else { Some(env) },
            labels: Some(labels),
            exposed_ports: if config.expose_ports.is_empty() {
                None
            } else {
                Some(
                    config
                        .expose_ports
                        .iter()
                        .map(|p| (format!("{p}/tcp"), HashMap::new()))
                        .collect(),
                )
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        debug!(name = %container_name, image = %config.image, network = ?network_mode, "creating container");
        let resp = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.to_string(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .map_err(|e| match e {
                // Docker returns 409 when a container by this name already
                // exists; callers pass `force` to retry past this (see
                // `TopologyManager::create`).
                bollard::errors::Error::DockerResponseServerError { status_code: 409, .. } => {
                    BlockadeError::ContainerConflict(container_name.to_string())
                }
                other => BlockadeError::Other(other.into()),
            })?;
        Ok(resp.id)
    }

    async fn start(&self, id: &str) -> Result<(), BlockadeError> {
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(|e| BlockadeError::Other(e.into()))
    }

    async fn stop(&self, id: &str) -> Result<(), BlockadeError> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: 10 }))
            .await
            .map_err(|e| BlockadeError::Other(e.into()))
    }

    async fn restart(&self, id: &str) -> Result<(), BlockadeError> {
        self.docker
            .restart_container(id, Some(RestartContainerOptions { t: 10 }))
            .await
            .map_err(|e| BlockadeError::Other(e.into()))
    }

    async fn kill(&self, id: &str, signal: &str) -> Result<(), BlockadeError> {
        self.docker
            .kill_container(id, Some(KillContainerOptions { signal: signal.to_string() }))
            .await
            .map_err(|e| BlockadeError::Other(e.into()))
    }

    async fn remove(&self, id: &str) -> Result<(), BlockadeError> {
        match self
            .docker
            .remove_container(id, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(BlockadeError::Other(e.into())),
        }
    }

    async fn inspect(&self, id: &str) -> Result<Option<RuntimeStatus>, BlockadeError> {
        match self.docker.inspect_container(id, None).await {
            Ok(details) => {
                let running = details
                    .state
                    .as_ref()
                    .and_then(|s| s.running)
                    .unwrap_or(false);
                let ip_address = details
                    .network_settings
                    .as_ref()
                    .and_then(|n| n.ip_address.clone())
                    .filter(|ip| !ip.is_empty());
                Ok(Some(RuntimeStatus { running, ip_address }))
            }
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(None),
            Err(e) => Err(BlockadeError::Other(e.into())),
        }
    }

    async fn logs(&self, id: &str, tail: Option<u64>) -> Result<String, BlockadeError> {
        use bollard::container::LogsOptions;
        let mut stream = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string()),
                ..Default::default()
            }),
        );
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BlockadeError::Other(e.into()))?;
            out.push_str(&chunk.to_string());
        }
        Ok(out)
    }

    async fn exec(&self, id: &str, argv: &[&str]) -> Result<String, BlockadeError> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(argv.iter().map(|s| s.to_string()).collect()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BlockadeError::Other(e.into()))?;

        let mut output = String::new();
        if let StartExecResults::Attached { mut output: stream, .. } =
            self.docker.start_exec(&exec.id, None).await.map_err(|e| BlockadeError::Other(e.into()))?
        {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| BlockadeError::Other(e.into()))?;
                output.push_str(&chunk.to_string());
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await.map_err(|e| BlockadeError::Other(e.into()))?;
        let exit_code = inspect.exit_code.unwrap_or(0);
        if exit_code != 0 {
            return Err(BlockadeError::HostExecError {
                command: argv.join(" "),
                exit_code: exit_code as i32,
                output,
            });
        }
        Ok(output)
    }

    async fn ensure_network(&self, name: &str) -> Result<(), BlockadeError> {
        use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);
        let existing = self
            .docker
            .list_networks(Some(ListNetworksOptions::<String> { filters }))
            .await
            .map_err(|e| BlockadeError::Other(e.into()))?;
        if existing.iter().any(|n| n.name.as_deref() == Some(name)) {
            return Ok(());
        }
        debug!(network = %name, "creating user-defined network");
        self.docker
            .create_network(CreateNetworkOptions::<String> {
                name: name.to_string(),
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| BlockadeError::Other(e.into()))?;
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), BlockadeError> {
        match self.docker.remove_network(name).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(BlockadeError::Other(e.into())),
        }
    }
}

/// Used by [`crate::application::topology_manager::TopologyManager::adopt`]
/// to resolve a bare container name/id that wasn't created by this
/// topology, by asking the runtime to list everything and match.
pub async fn find_container_id(docker: &Docker, name_or_id: &str) -> Result<Option<String>, BlockadeError> {
    let mut filters = HashMap::new();
    filters.insert("name".to_string(), vec![name_or_id.to_string()]);
    let containers = docker
        .list_containers(Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        }))
        .await
        .map_err(|e| BlockadeError::Other(e.into()))?;
    Ok(containers.into_iter().find_map(|c| c.id))
}
