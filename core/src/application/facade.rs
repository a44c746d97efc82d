// SPDX-License-Identifier: Apache-2.0

//! The Controller Facade: a single, explicit, long-lived entry point for
//! every operation this crate exposes, held by the CLI or the REST server
//! as an `Arc<ControllerFacade>` and never as process-global mutable
//! state.
//!
//! This directly corrects an anti-pattern in the tool being replaced:
//! `blockade/api/manager.py::BlockadeManager` keeps its topology registry
//! in module-level globals (`BLOCKADE_CONFIGS = {}`), and `blockade/cli.py`
//! keeps a module-level `_host_exec` singleton. Both make every caller
//! implicitly share mutable process state and make testing require global
//! reset between cases. Here, a fresh `ControllerFacade::new` is cheap and
//! self-contained, and everything it owns is reachable only through it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bollard::Docker;
use tokio::sync::Mutex as AsyncMutex;

use crate::domain::chaos::{ChaosEvent, ChaosOptions, ChaosState};
use crate::domain::config::BlockadeConfig;
use crate::domain::errors::BlockadeError;
use crate::domain::topology::{validate_topology_id, Topology};
use crate::infrastructure::audit_log::AuditLog;
use crate::infrastructure::docker_runtime::{find_container_id, ContainerRuntime, DockerRuntime};
use crate::infrastructure::firewall::FirewallController;
use crate::infrastructure::host_exec::{DockerHostExecutor, HostExec};
use crate::infrastructure::interface_resolver::InterfaceResolver;
use crate::infrastructure::state_store::StateStore;
use crate::infrastructure::traffic_shaper::TrafficShaper;

use super::chaos_driver::ChaosDriver;
use super::topology_manager::TopologyManager;

struct Entry {
    manager: Arc<TopologyManager>,
    /// Guards every mutating operation against this one topology, per the
    /// concurrency model: operations on different topologies never block
    /// each other.
    lock: AsyncMutex<()>,
    chaos: AsyncMutex<Option<Arc<ChaosDriver>>>,
}

/// Long-lived, explicit owner of every topology this process knows about.
/// Construct one per CLI invocation (short-lived) or once at daemon
/// startup (long-lived); both are legitimate uses of the same type.
pub struct ControllerFacade {
    data_dir: PathBuf,
    docker: Docker,
    topologies: AsyncMutex<HashMap<String, Arc<Entry>>>,
}

impl ControllerFacade {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, BlockadeError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            BlockadeError::ConfigError(format!("could not connect to the Docker daemon: {e}"))
        })?;
        Ok(ControllerFacade {
            data_dir: data_dir.into(),
            docker,
            topologies: AsyncMutex::new(HashMap::new()),
        })
    }

    fn build_manager(&self, blockade_id: &str) -> TopologyManager {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect().expect("docker already verified reachable"));
        let host_exec: Arc<dyn HostExec> =
            Arc::new(DockerHostExecutor::new(self.docker.clone(), format!("blockade-{blockade_id}")));
        let firewall = FirewallController::new(Arc::clone(&host_exec), blockade_id);
        let shaper = TrafficShaper::new(Arc::clone(&host_exec));
        let resolver = InterfaceResolver::new(Arc::clone(&runtime), Arc::clone(&host_exec));
        let state = StateStore::new(self.data_dir.join(blockade_id));
        let audit = AuditLog::new(self.data_dir.join(blockade_id), blockade_id);
        TopologyManager::new(
            blockade_id.to_string(),
            runtime,
            firewall,
            shaper,
            resolver,
            host_exec,
            state,
            audit,
        )
    }

    async fn entry(&self, blockade_id: &str) -> Result<Arc<Entry>, BlockadeError> {
        validate_topology_id(blockade_id)?;
        let mut topologies = self.topologies.lock().await;
        if let Some(entry) = topologies.get(blockade_id) {
            return Ok(Arc::clone(entry));
        }
        let entry = Arc::new(Entry {
            manager: Arc::new(self.build_manager(blockade_id)),
            lock: AsyncMutex::new(()),
            chaos: AsyncMutex::new(None),
        });
        topologies.insert(blockade_id.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    pub async fn up(&self, blockade_id: &str, config: &BlockadeConfig, force: bool) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.create(config, force).await
    }

    /// Topology ids this process has touched since startup (created,
    /// added to, or otherwise looked up), in no particular persisted
    /// order beyond insertion. There is no independent directory listing
    /// of every topology ever created on disk — see `list_blockades` in
    /// the REST layer for why that's the right scope.
    pub async fn known_ids(&self) -> Vec<String> {
        self.topologies.lock().await.keys().cloned().collect()
    }

    pub async fn status(&self, blockade_id: &str) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.status().await
    }

    pub async fn destroy(&self, blockade_id: &str) -> Result<(), BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.destroy().await?;
        self.topologies.lock().await.remove(blockade_id);
        Ok(())
    }

    pub async fn start(&self, blockade_id: &str, names: &[String]) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.start(names).await
    }

    pub async fn stop(&self, blockade_id: &str, names: &[String]) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.stop(names).await
    }

    pub async fn restart(&self, blockade_id: &str, names: &[String]) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.restart(names).await
    }

    pub async fn kill(&self, blockade_id: &str, names: &[String], signal: &str) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.kill(names, signal).await
    }

    pub async fn logs(&self, blockade_id: &str, name: &str, tail: Option<u64>) -> Result<String, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.logs(name, tail).await
    }

    pub async fn flaky(&self, blockade_id: &str, names: &[String], params: Option<&str>) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.flaky(names, params).await
    }

    pub async fn slow(&self, blockade_id: &str, names: &[String], params: Option<&str>) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.slow(names, params).await
    }

    pub async fn duplicate(&self, blockade_id: &str, names: &[String], params: Option<&str>) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.duplicate(names, params).await
    }

    pub async fn fast(&self, blockade_id: &str, names: &[String]) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.fast(names).await
    }

    pub async fn partition(&self, blockade_id: &str, partitions: &[Vec<String>]) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.partition(partitions).await
    }

    pub async fn random_partition(&self, blockade_id: &str) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.random_partition().await
    }

    pub async fn join(&self, blockade_id: &str) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        entry.manager.join().await
    }

    pub async fn add(&self, blockade_id: &str, name: &str, name_or_id: &str) -> Result<Topology, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let _guard = entry.lock.lock().await;
        let container_id = find_container_id(&self.docker, name_or_id)
            .await?
            .ok_or_else(|| BlockadeError::ContainerNotFound(name_or_id.to_string()))?;
        entry.manager.adopt(name.to_string(), container_id).await
    }

    pub async fn events(&self, blockade_id: &str) -> Result<Vec<crate::domain::audit::AuditEvent>, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        entry.manager.audit().read_all()
    }

    pub async fn chaos_start(&self, blockade_id: &str, options: ChaosOptions) -> Result<ChaosState, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let mut chaos = entry.chaos.lock().await;
        let driver = match chaos.as_ref() {
            Some(driver) => Arc::clone(driver),
            None => {
                let driver = ChaosDriver::new(Arc::clone(&entry.manager), options);
                *chaos = Some(Arc::clone(&driver));
                driver
            }
        };
        drop(chaos);
        driver.handle_event(ChaosEvent::Start).await
    }

    pub async fn chaos_stop(&self, blockade_id: &str) -> Result<ChaosState, BlockadeError> {
        let driver = self.chaos_driver(blockade_id).await?;
        driver.handle_event(ChaosEvent::Stop).await
    }

    pub async fn chaos_delete(&self, blockade_id: &str) -> Result<ChaosState, BlockadeError> {
        let driver = self.chaos_driver(blockade_id).await?;
        let result = driver.handle_event(ChaosEvent::Delete).await;
        let entry = self.entry(blockade_id).await?;
        *entry.chaos.lock().await = None;
        result
    }

    pub async fn chaos_status(&self, blockade_id: &str) -> Result<Option<ChaosState>, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let chaos = entry.chaos.lock().await;
        match chaos.as_ref() {
            Some(driver) => Ok(Some(driver.state().await)),
            None => Ok(None),
        }
    }

    pub async fn chaos_update_options(&self, blockade_id: &str, options: ChaosOptions) -> Result<(), BlockadeError> {
        let driver = self.chaos_driver(blockade_id).await?;
        driver.update_options(options).await
    }

    async fn chaos_driver(&self, blockade_id: &str) -> Result<Arc<ChaosDriver>, BlockadeError> {
        let entry = self.entry(blockade_id).await?;
        let chaos = entry.chaos.lock().await;
        chaos
            .as_ref()
            .cloned()
            .ok_or_else(|| BlockadeError::UsageError(format!("no chaos session for '{blockade_id}'")))
    }
}
