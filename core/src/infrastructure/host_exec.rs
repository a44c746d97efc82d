// SPDX-License-Identifier: Apache-2.0

//! The Host Executor: a privileged, long-lived helper container used to run
//! commands in the Docker host's network namespace (iptables, tc, ip link)
//! from inside a container-based CLI/daemon that has no other way to reach
//! the host.
//!
//! Grounded on `host.py::HostExec`: lazily create a `network_mode=host,
//! privileged=true` container running a sleep loop, `docker exec` into it
//! for each command, and recreate it if it's gone missing or expired.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{Config, CreateContainerOptions, KillContainerOptions, RemoveContainerOptions};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures::StreamExt;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::errors::BlockadeError;

/// Abstraction over "run this argv on the Docker host", so
/// [`crate::infrastructure::firewall::FirewallController`] and
/// [`crate::infrastructure::traffic_shaper::TrafficShaper`] can be tested
/// without a live Docker daemon.
#[async_trait]
pub trait HostExec: Send + Sync {
    async fn run(&self, argv: &[&str]) -> Result<String, BlockadeError>;
    /// Stop and remove the helper container, if one is currently live.
    async fn close(&self) -> Result<(), BlockadeError>;
}

/// Default image for the helper container. Needs `iproute2` and
/// `iptables` on PATH.
pub const DEFAULT_HELPER_IMAGE: &str = "buildpack-deps:bionic-scm";

/// Environment variable overriding the helper container's name prefix.
pub const HELPER_PREFIX_ENV: &str = "BLOCKADE_HOST_EXEC_PREFIX";
/// Default helper container name prefix, used when [`HELPER_PREFIX_ENV`]
/// isn't set.
pub const DEFAULT_HELPER_PREFIX: &str = "blockade-host-exec";

const DEFAULT_CONTAINER_TIMEOUT: Duration = Duration::from_secs(3600);
const DEFAULT_CONTAINER_EXPIRE: Duration = Duration::from_secs(3000);

/// A fresh random token appended to the helper container name, so a
/// replaced helper never collides with a predecessor still being torn
/// down out of band.
fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..8).map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap()).collect()
}

struct HelperContainer {
    id: String,
    created_at: Instant,
}

/// `HostExec` implementation backed by a Docker helper container.
pub struct DockerHostExecutor {
    docker: Docker,
    image: String,
    container_prefix: String,
    expire_after: Duration,
    helper: Mutex<Option<HelperContainer>>,
}

impl DockerHostExecutor {
    /// `scope` further qualifies the helper name beyond the env-or-default
    /// prefix (this crate scopes one helper per topology id, rather than
    /// sharing a single process-wide helper, so two topologies' privileged
    /// exec traffic never contends for the same container).
    pub fn new(docker: Docker, scope: impl Into<String>) -> Self {
        let prefix = std::env::var(HELPER_PREFIX_ENV).unwrap_or_else(|_| DEFAULT_HELPER_PREFIX.to_string());
        DockerHostExecutor {
            docker,
            image: DEFAULT_HELPER_IMAGE.to_string(),
            container_prefix: format!("{prefix}-{}", scope.into()),
            expire_after: DEFAULT_CONTAINER_EXPIRE,
            helper: Mutex::new(None),
        }
    }

    /// A fresh helper container name: the configured prefix plus a random
    /// token, so a just-replaced helper can never collide with a
    /// predecessor still being torn down out of band.
    fn container_name(&self) -> String {
        format!("{}-{}", self.container_prefix, random_token())
    }

    async fn create_container(&self) -> Result<String, BlockadeError> {
        let name = self.container_name();
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };
        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "sleep".to_string(),
                DEFAULT_CONTAINER_TIMEOUT.as_secs().to_string(),
            ]),
            host_config: Some(bollard::service::HostConfig {
                network_mode: Some("host".to_string()),
                privileged: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        match self.docker.create_container(Some(options.clone()), config.clone()).await {
            Ok(resp) => {
                self.docker
                    .start_container::<String>(&resp.id, None)
                    .await
                    .map_err(|e| BlockadeError::HostExecError {
                        command: "start helper container".into(),
                        exit_code: -1,
                        output: e.to_string(),
                    })?;
                Ok(resp.id)
            }
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                debug!(image = %self.image, "pulling helper image before retry");
                let mut stream = self.docker.create_image(
                    Some(CreateImageOptions {
                        from_image: self.image.clone(),
                        ..Default::default()
                    }),
                    None,
                    None,
                );
                while let Some(progress) = stream.next().await {
                    progress.map_err(|e| BlockadeError::HostExecError {
                        command: "pull helper image".into(),
                        exit_code: -1,
                        output: e.to_string(),
                    })?;
                }
                let resp = self
                    .docker
                    .create_container(Some(options), config)
                    .await
                    .map_err(|e| BlockadeError::HostExecError {
                        command: "create helper container".into(),
                        exit_code: -1,
                        output: e.to_string(),
                    })?;
                self.docker
                    .start_container::<String>(&resp.id, None)
                    .await
                    .map_err(|e| BlockadeError::HostExecError {
                        command: "start helper container".into(),
                        exit_code: -1,
                        output: e.to_string(),
                    })?;
                Ok(resp.id)
            }
            Err(e) => Err(BlockadeError::HostExecError {
                command: "create helper container".into(),
                exit_code: -1,
                output: e.to_string(),
            }),
        }
    }

    async fn remove_container(&self, id: &str) {
        let _ = self
            .docker
            .kill_container(id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await;
        let _ = self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
    }

    /// Return the id of a running, non-expired helper container, creating
    /// one if needed.
    async fn assure_container(&self) -> Result<String, BlockadeError> {
        let mut guard = self.helper.lock().await;
        if let Some(helper) = guard.as_ref() {
            if helper.created_at.elapsed() < self.expire_after {
                return Ok(helper.id.clone());
            }
            debug!("helper container expired, recreating");
            self.remove_container(&helper.id).await;
            *guard = None;
        }

        let id = self.create_container().await?;
        *guard = Some(HelperContainer {
            id: id.clone(),
            created_at: Instant::now(),
        });
        Ok(id)
    }

    async fn reset_container(&self) {
        let mut guard = self.helper.lock().await;
        *guard = None;
    }

    async fn exec_in(&self, container_id: &str, argv: &[&str]) -> Result<String, BlockadeError> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(argv.iter().map(|s| s.to_string()).collect()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BlockadeError::HostExecError {
                command: argv.join(" "),
                exit_code: -1,
                output: e.to_string(),
            })?;

        let mut output = String::new();
        if let StartExecResults::Attached { mut output: stream, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| BlockadeError::HostExecError {
                command: argv.join(" "),
                exit_code: -1,
                output: e.to_string(),
            })?
        {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| BlockadeError::HostExecError {
                    command: argv.join(" "),
                    exit_code: -1,
                    output: e.to_string(),
                })?;
                output.push_str(&chunk.to_string());
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| BlockadeError::HostExecError {
                command: argv.join(" "),
                exit_code: -1,
                output: e.to_string(),
            })?;
        let exit_code = inspect.exit_code.unwrap_or(0) as i32;

        if exit_code != 0 {
            return Err(BlockadeError::HostExecError {
                command: argv.join(" "),
                exit_code,
                output,
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl HostExec for DockerHostExecutor {
    async fn run(&self, argv: &[&str]) -> Result<String, BlockadeError> {
        debug!(?argv, "running host command");
        let container_id = self.assure_container().await?;

        match self.exec_in(&container_id, argv).await {
            Ok(out) => Ok(out),
            Err(BlockadeError::HostExecError { command, exit_code, output }) if exit_code == -1 => {
                // The helper container itself may have vanished out of
                // band; reset and retry exactly once.
                warn!(%command, "helper container exec failed, resetting and retrying once");
                self.reset_container().await;
                let container_id = self.assure_container().await?;
                self.exec_in(&container_id, argv).await.map_err(|e| match e {
                    BlockadeError::HostExecError { .. } => e,
                    other => BlockadeError::HostExecError {
                        command,
                        exit_code,
                        output: format!("{output}\nretry failed: {other}"),
                    },
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn close(&self) -> Result<(), BlockadeError> {
        let mut guard = self.helper.lock().await;
        if let Some(helper) = guard.take() {
            self.remove_container(&helper.id).await;
        }
        Ok(())
    }
}
