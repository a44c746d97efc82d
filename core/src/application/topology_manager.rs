// SPDX-License-Identifier: Apache-2.0

//! Orchestrates one topology's lifecycle: bringing containers up in
//! dependency order, reconciling status against the runtime, applying
//! network faults and partitions, and keeping persisted state in sync.
//!
//! Grounded on `core.py::Blockade` (container lifecycle, status
//! reconciliation) and `net.py::BlockadeNetwork` (fault/partition
//! delegation), wired together the way the reference orchestrator wires a
//! use-case object around its runtime/repository seams.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::audit::AuditEvent;
use crate::domain::config::{dependency_sorted, BlockadeConfig, NetworkDriver};
use crate::domain::container::{ContainerState, LiveContainer, NetworkState};
use crate::domain::errors::BlockadeError;
use crate::domain::partition::{chain_groups, expand_partitions};
use crate::domain::topology::{PersistedState, Topology};
use crate::infrastructure::audit_log::AuditLog;
use crate::infrastructure::docker_runtime::ContainerRuntime;
use crate::infrastructure::firewall::FirewallController;
use crate::infrastructure::host_exec::HostExec;
use crate::infrastructure::interface_resolver::InterfaceResolver;
use crate::infrastructure::state_store::StateStore;
use crate::infrastructure::traffic_shaper::{NetemKind, TrafficShaper};

pub struct TopologyManager {
    pub blockade_id: String,
    runtime: Arc<dyn ContainerRuntime>,
    firewall: FirewallController,
    shaper: TrafficShaper,
    resolver: InterfaceResolver,
    host_exec: Arc<dyn HostExec>,
    state: StateStore,
    audit: AuditLog,
}

impl TopologyManager {
    pub fn new(
        blockade_id: String,
        runtime: Arc<dyn ContainerRuntime>,
        firewall: FirewallController,
        shaper: TrafficShaper,
        resolver: InterfaceResolver,
        host_exec: Arc<dyn HostExec>,
        state: StateStore,
        audit: AuditLog,
    ) -> Self {
        TopologyManager {
            blockade_id,
            runtime,
            firewall,
            shaper,
            resolver,
            host_exec,
            state,
            audit,
        }
    }

    fn record(&self, event: &str, targets: Vec<String>, result: &Result<(), BlockadeError>) {
        let entry = match result {
            Ok(()) => AuditEvent::ok(Utc::now(), event, targets),
            Err(e) => AuditEvent::error(Utc::now(), event, targets, e.to_string()),
        };
        self.audit.log(&entry);
    }

    /// Create and start every container in `config`, in dependency order,
    /// honoring each container's `start_delay`. Persists the resulting
    /// topology state. Fails with [`BlockadeError::AlreadyInitialized`] if
    /// this topology already has persisted state — checked up front,
    /// before any container is touched.
    ///
    /// When `force` is set, a container-name conflict on the runtime (some
    /// earlier, non-topology-tracked container already holds the name) is
    /// resolved by force-removing the colliding container and retrying
    /// that one container's create exactly once; without `force` the
    /// conflict is returned to the caller as-is.
    pub async fn create(&self, config: &BlockadeConfig, force: bool) -> Result<Topology, BlockadeError> {
        if self.state.exists() {
            return Err(BlockadeError::AlreadyInitialized(self.state.data_dir().to_path_buf()));
        }

        let ordered = dependency_sorted(&config.containers)?;
        let mut containers = Vec::with_capacity(ordered.len());

        let network_name = udn_network_name(&self.blockade_id);
        if config.network.driver == NetworkDriver::Udn {
            self.runtime.ensure_network(&network_name).await?;
        }
        let network_mode = (config.network.driver == NetworkDriver::Udn).then_some(network_name.as_str());

        for container_config in &ordered {
            if container_config.start_delay > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(container_config.start_delay)).await;
            }

            let container_name = container_config
                .container_name
                .clone()
                .unwrap_or_else(|| format!("{}_{}", self.blockade_id, container_config.name));
            let live = self.start_one(container_config, &container_name, network_mode, force).await;
            match live {
                Ok(live) => containers.push(live),
                Err(e) => {
                    warn!(container = %container_config.name, error = %e, "failed to start container");
                    self.record("create", ordered.iter().map(|c| c.name.clone()).collect(), &Err(clone_err(&e)));
                    return Err(e);
                }
            }
        }

        let topology = Topology { blockade_id: self.blockade_id.clone(), containers, network: config.network.clone() };
        self.state.initialize(&topology.to_persisted())?;
        self.record("create", topology.names(), &Ok(()));
        Ok(topology)
    }

    async fn start_one(
        &self,
        config: &crate::domain::container::ContainerConfig,
        container_name: &str,
        network_mode: Option<&str>,
        force: bool,
    ) -> Result<LiveContainer, BlockadeError> {
        let id = match self.runtime.create(config, container_name, network_mode, &self.blockade_id).await {
            Err(BlockadeError::ContainerConflict(name)) if force => {
                warn!(container = %name, "force: removing colliding container and retrying create");
                // We don't have the colliding container's id; `remove` is
                // keyed by id, not name, so go through the runtime's own
                // force-remove-by-name path once more after the retry
                // fails, rather than trying to resolve the id ourselves.
                self.runtime.remove(container_name).await.ok();
                self.runtime.create(config, container_name, network_mode, &self.blockade_id).await?
            }
            other => other?,
        };
        self.runtime.start(&id).await?;

        let status = self.runtime.inspect(&id).await?;
        let device = match self.resolver.resolve(&id).await {
            Ok(device) => Some(device),
            Err(e) => {
                warn!(container = %config.name, error = %e, "could not resolve veth device");
                None
            }
        };

        Ok(LiveContainer {
            name: config.name.clone(),
            container_id: id,
            state: if status.as_ref().map(|s| s.running).unwrap_or(false) {
                ContainerState::Up
            } else {
                ContainerState::Down
            },
            ip_address: status.and_then(|s| s.ip_address),
            device,
            network_state: NetworkState::Normal,
            partition: None,
            neutral: config.neutral,
            holy: config.holy,
        })
    }

    /// Reload persisted state and reconcile each container's declared state
    /// against what the runtime, firewall, and traffic shaper actually
    /// report. Per §4.2, the firewall is reasoned about from live `iptables
    /// -L FORWARD` output, not cached state, so `source_chains` is queried
    /// fresh on every call rather than trusting `container.partition`.
    pub async fn status(&self) -> Result<Topology, BlockadeError> {
        let persisted = self.state.load()?;
        let mut topology = Topology::from_persisted(persisted);

        let source_chains = self.firewall.source_chains().await?;

        for container in topology.containers.iter_mut() {
            match self.runtime.inspect(&container.container_id).await? {
                Some(status) => {
                    container.state = if status.running { ContainerState::Up } else { ContainerState::Down };
                    if status.ip_address.is_some() {
                        container.ip_address = status.ip_address;
                    }
                }
                None => container.state = ContainerState::Missing,
            }

            if container.is_up() {
                container.device = self.resolver.resolve(&container.container_id).await.ok();
                container.network_state = match &container.device {
                    Some(device) => self.shaper.network_state(device).await,
                    None => NetworkState::Unknown,
                };
            } else {
                container.device = None;
                container.network_state = NetworkState::Unknown;
            }

            container.partition = container.ip_address.as_ref().and_then(|ip| source_chains.get(ip).copied());
        }

        Ok(topology)
    }

    fn persist(&self, topology: &Topology) -> Result<(), BlockadeError> {
        self.state.update(&topology.to_persisted())
    }

    /// Stop and remove every container, restore their network state, and
    /// remove all persisted state and audit history for this topology.
    pub async fn destroy(&self) -> Result<(), BlockadeError> {
        let topology = self.status().await?;
        for container in &topology.containers {
            if let Some(device) = &container.device {
                let _ = self.shaper.restore(device).await;
            }
            let _ = self.runtime.stop(&container.container_id).await;
            let _ = self.runtime.remove(&container.container_id).await;
        }
        let _ = self.firewall.clear().await;
        if topology.network.driver == NetworkDriver::Udn {
            let _ = self.runtime.remove_network(&udn_network_name(&self.blockade_id)).await;
        }
        self.state.destroy()?;
        self.audit.clean()?;
        let _ = self.host_exec.close().await;
        info!(blockade_id = %self.blockade_id, "destroyed topology");
        Ok(())
    }

    fn selected<'a>(&self, topology: &'a Topology, names: &[String]) -> Result<Vec<&'a LiveContainer>, BlockadeError> {
        names
            .iter()
            .map(|name| {
                topology
                    .container(name)
                    .ok_or_else(|| BlockadeError::ContainerNotFound(name.clone()))
            })
            .collect()
    }

    pub async fn start(&self, names: &[String]) -> Result<Topology, BlockadeError> {
        let mut topology = self.status().await?;
        for name in names {
            let id = topology
                .container(name)
                .ok_or_else(|| BlockadeError::ContainerNotFound(name.clone()))?
                .container_id
                .clone();
            self.runtime.start(&id).await?;
            if let Some(c) = topology.container_mut(name) {
                c.state = ContainerState::Up;
            }
        }
        self.persist(&topology)?;
        self.record("start", names.to_vec(), &Ok(()));
        Ok(topology)
    }

    pub async fn stop(&self, names: &[String]) -> Result<Topology, BlockadeError> {
        let mut topology = self.status().await?;
        for name in names {
            let id = topology
                .container(name)
                .ok_or_else(|| BlockadeError::ContainerNotFound(name.clone()))?
                .container_id
                .clone();
            self.runtime.stop(&id).await?;
            if let Some(c) = topology.container_mut(name) {
                c.state = ContainerState::Down;
            }
        }
        self.persist(&topology)?;
        self.record("stop", names.to_vec(), &Ok(()));
        Ok(topology)
    }

    pub async fn restart(&self, names: &[String]) -> Result<Topology, BlockadeError> {
        let topology = self.status().await?;
        for name in names {
            let id = topology
                .container(name)
                .ok_or_else(|| BlockadeError::ContainerNotFound(name.clone()))?
                .container_id
                .clone();
            self.runtime.restart(&id).await?;
        }
        self.record("restart", names.to_vec(), &Ok(()));
        self.status().await
    }

    pub async fn kill(&self, names: &[String], signal: &str) -> Result<Topology, BlockadeError> {
        let topology = self.status().await?;
        for name in names {
            let id = topology
                .container(name)
                .ok_or_else(|| BlockadeError::ContainerNotFound(name.clone()))?
                .container_id
                .clone();
            self.runtime.kill(&id, signal).await?;
        }
        self.record("kill", names.to_vec(), &Ok(()));
        self.status().await
    }

    pub async fn logs(&self, name: &str, tail: Option<u64>) -> Result<String, BlockadeError> {
        let topology = self.status().await?;
        let container = topology
            .container(name)
            .ok_or_else(|| BlockadeError::ContainerNotFound(name.to_string()))?;
        self.runtime.logs(&container.container_id, tail).await
    }

    async fn apply_netem(&self, names: &[String], kind: NetemKind, params: &str) -> Result<Topology, BlockadeError> {
        let mut topology = self.status().await?;
        let selected = self.selected(&topology, names)?;
        let devices: Vec<(String, String)> = selected
            .iter()
            .filter_map(|c| c.device.clone().map(|d| (c.name.clone(), d)))
            .collect();

        for (_, device) in &devices {
            self.shaper.netem(device, params, kind).await?;
        }

        let new_state = match kind {
            NetemKind::Loss => NetworkState::Flaky,
            NetemKind::Delay => NetworkState::Slow,
            NetemKind::Duplicate => NetworkState::Duplicate,
        };
        for (name, _) in &devices {
            if let Some(c) = topology.container_mut(name) {
                c.network_state = new_state;
            }
        }
        self.persist(&topology)?;
        Ok(topology)
    }

    pub async fn flaky(&self, names: &[String], params: Option<&str>) -> Result<Topology, BlockadeError> {
        let topology = self.status().await?;
        let default = topology.network.flaky_params().to_string();
        let params = params.unwrap_or(&default);
        let result = self.apply_netem(names, NetemKind::Loss, params).await;
        self.record("flaky", names.to_vec(), &result.as_ref().map(|_| ()).map_err(clone_err));
        result
    }

    pub async fn slow(&self, names: &[String], params: Option<&str>) -> Result<Topology, BlockadeError> {
        let topology = self.status().await?;
        let default = topology.network.slow_params().to_string();
        let params = params.unwrap_or(&default);
        let result = self.apply_netem(names, NetemKind::Delay, params).await;
        self.record("slow", names.to_vec(), &result.as_ref().map(|_| ()).map_err(clone_err));
        result
    }

    pub async fn duplicate(&self, names: &[String], params: Option<&str>) -> Result<Topology, BlockadeError> {
        let topology = self.status().await?;
        let default = topology.network.duplicate_params().to_string();
        let params = params.unwrap_or(&default);
        let result = self.apply_netem(names, NetemKind::Duplicate, params).await;
        self.record("duplicate", names.to_vec(), &result.as_ref().map(|_| ()).map_err(clone_err));
        result
    }

    /// Restore named containers to normal network behavior (no loss/delay/
    /// duplication, no partition membership).
    pub async fn fast(&self, names: &[String]) -> Result<Topology, BlockadeError> {
        let mut topology = self.status().await?;
        let selected = self.selected(&topology, names)?;
        for c in &selected {
            if let Some(device) = &c.device {
                self.shaper.restore(device).await?;
            }
        }
        for name in names {
            if let Some(c) = topology.container_mut(name) {
                c.network_state = NetworkState::Normal;
            }
        }
        self.persist(&topology)?;
        self.record("fast", names.to_vec(), &Ok(()));
        Ok(topology)
    }

    /// Partition the topology's targetable containers into disjoint
    /// groups, cutting off traffic between groups while leaving holy
    /// containers reachable from everywhere.
    ///
    /// `holy` containers may not appear in any requested group. `neutral`
    /// containers always end up in their own singleton group, even if an
    /// earlier call already placed them elsewhere — they shadow any
    /// explicit placement. `partition()` always starts by clearing this
    /// topology's existing firewall state, so the result is a pure
    /// function of `requested`.
    pub async fn partition(&self, requested: &[Vec<String>]) -> Result<Topology, BlockadeError> {
        let mut topology = self.status().await?;

        for group in requested {
            for name in group {
                if let Some(c) = topology.container(name) {
                    if c.holy {
                        return Err(BlockadeError::UsageError(format!(
                            "container '{}' is holy and cannot be partitioned",
                            name
                        )));
                    }
                }
            }
        }

        let partitionable: std::collections::HashSet<String> = topology
            .containers
            .iter()
            .filter(|c| !c.holy)
            .map(|c| c.name.clone())
            .collect();

        let mut expanded = expand_partitions(&partitionable, requested)?;

        let neutral_names: Vec<String> =
            topology.containers.iter().filter(|c| c.neutral).map(|c| c.name.clone()).collect();
        if !neutral_names.is_empty() {
            for group in expanded.iter_mut() {
                for name in &neutral_names {
                    group.remove(name);
                }
            }
            expanded.retain(|g| !g.is_empty());
            for name in neutral_names {
                expanded.push(std::iter::once(name).collect());
            }
        }

        let groups = chain_groups(&expanded);

        let all_ips: Vec<String> = topology
            .containers
            .iter()
            .filter(|c| !c.holy)
            .filter_map(|c| c.ip_address.clone())
            .collect();

        self.firewall.clear().await?;

        for c in topology.containers.iter_mut() {
            c.partition = None;
        }

        // A single partition covering every container is equivalent to no
        // partitioning at all: no chains need to be created.
        if groups.len() > 1 {
            for (i, group) in groups.iter().enumerate() {
                let index = i + 1;
                let member_ips: Vec<String> = topology
                    .containers
                    .iter()
                    .filter(|c| group.contains(&c.name))
                    .filter_map(|c| c.ip_address.clone())
                    .collect();
                self.firewall.apply_partition(index, &member_ips, &all_ips).await?;
                for name in group {
                    if let Some(c) = topology.container_mut(name) {
                        c.partition = Some(index);
                    }
                }
            }
        }

        self.persist(&topology)?;
        self.record("partition", requested.iter().flatten().cloned().collect(), &Ok(()));
        Ok(topology)
    }

    /// Partition currently-UP non-holy containers into a random number of
    /// groups `k ∈ [1, N]`. `k ≤ 1` is treated as "no partition": this just
    /// calls [`Self::join`]. Otherwise every group gets at least one
    /// container, and the remainder is distributed uniformly.
    pub async fn random_partition(&self) -> Result<Topology, BlockadeError> {
        use rand::seq::SliceRandom;
        use rand::Rng;

        let topology = self.status().await?;
        let mut candidates: Vec<String> = topology
            .containers
            .iter()
            .filter(|c| c.is_up() && !c.holy)
            .map(|c| c.name.clone())
            .collect();

        if candidates.is_empty() {
            return self.join().await;
        }

        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);
        let n = candidates.len();
        let k = rng.gen_range(1..=n);

        if k <= 1 {
            return self.join().await;
        }

        let mut groups: Vec<Vec<String>> = (0..k).map(|_| Vec::new()).collect();
        for (i, name) in candidates.into_iter().enumerate() {
            groups[i % k].push(name);
        }

        self.partition(&groups).await
    }

    /// Clear every partition, restoring full connectivity between all
    /// containers.
    pub async fn join(&self) -> Result<Topology, BlockadeError> {
        let mut topology = self.status().await?;
        self.firewall.clear().await?;
        for c in topology.containers.iter_mut() {
            c.partition = None;
        }
        self.persist(&topology)?;
        self.record("join", Vec::new(), &Ok(()));
        Ok(topology)
    }

    /// Adopt a container not created by this topology (looked up by name
    /// or runtime id on the container runtime) into the persisted state.
    pub async fn adopt(&self, name: String, container_id: String) -> Result<Topology, BlockadeError> {
        let mut topology = self.status().await?;
        if topology.container(&name).is_some() {
            return Err(BlockadeError::ContainerConflict(name));
        }
        let status = self.runtime.inspect(&container_id).await?
            .ok_or_else(|| BlockadeError::ContainerNotFound(container_id.clone()))?;
        let device = self.resolver.resolve(&container_id).await.ok();

        topology.containers.push(LiveContainer {
            name: name.clone(),
            container_id,
            state: if status.running { ContainerState::Up } else { ContainerState::Down },
            ip_address: status.ip_address,
            device,
            network_state: NetworkState::Normal,
            partition: None,
            neutral: false,
            holy: false,
        });
        self.persist(&topology)?;
        self.record("add", vec![name], &Ok(()));
        Ok(topology)
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn state_dir_exists(&self) -> bool {
        self.state.exists()
    }
}

fn clone_err(e: &BlockadeError) -> BlockadeError {
    BlockadeError::Other(anyhow::anyhow!(e.to_string()))
}

/// Name of the user-defined network created for a topology under the `udn`
/// network driver.
fn udn_network_name(blockade_id: &str) -> String {
    format!("{blockade_id}_net")
}

/// In-memory registry is intentionally not kept here: see
/// [`crate::application::facade::ControllerFacade`] for per-topology
/// locking and lifecycle.
pub type TopologyManagerMap = HashMap<String, Arc<TopologyManager>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::infrastructure::docker_runtime::RuntimeStatus;

    /// In-memory [`ContainerRuntime`] fake: tracks created/started
    /// containers by id, and enforces the same name-conflict behavior the
    /// real Docker API does (409 on a colliding container name), so
    /// `TopologyManager::create`'s `force` retry path can be exercised
    /// without a live daemon.
    #[derive(Default)]
    struct FakeRuntime {
        inner: StdMutex<FakeRuntimeInner>,
    }

    #[derive(Default)]
    struct FakeRuntimeInner {
        next_id: u64,
        containers: HashMap<String, (String, bool)>, // id -> (name, running)
        names_in_use: HashSet<String>,
        networks: HashSet<String>,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn create(
            &self,
            _config: &crate::domain::container::ContainerConfig,
            container_name: &str,
            _network_mode: Option<&str>,
            _blockade_id: &str,
        ) -> Result<String, BlockadeError> {
            let mut inner = self.inner.lock().unwrap();
            if inner.names_in_use.contains(container_name) {
                return Err(BlockadeError::ContainerConflict(container_name.to_string()));
            }
            inner.next_id += 1;
            let id = format!("fake-{}", inner.next_id);
            inner.names_in_use.insert(container_name.to_string());
            inner.containers.insert(id.clone(), (container_name.to_string(), false));
            Ok(id)
        }

        async fn start(&self, id: &str) -> Result<(), BlockadeError> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(entry) = inner.containers.get_mut(id) {
                entry.1 = true;
            }
            Ok(())
        }

        async fn stop(&self, id: &str) -> Result<(), BlockadeError> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(entry) = inner.containers.get_mut(id) {
                entry.1 = false;
            }
            Ok(())
        }

        async fn restart(&self, id: &str) -> Result<(), BlockadeError> {
            self.start(id).await
        }

        async fn kill(&self, id: &str, _signal: &str) -> Result<(), BlockadeError> {
            self.stop(id).await
        }

        async fn remove(&self, id: &str) -> Result<(), BlockadeError> {
            let mut inner = self.inner.lock().unwrap();
            // Accept either a tracked id or a bare container name, the way
            // the Docker API's `/containers/{id}` path does — the `force`
            // retry path in `TopologyManager::start_one` removes by name.
            let matched_id = inner
                .containers
                .iter()
                .find(|(cid, (name, _))| cid.as_str() == id || name == id)
                .map(|(cid, _)| cid.clone());
            if let Some(cid) = matched_id {
                if let Some((name, _)) = inner.containers.remove(&cid) {
                    inner.names_in_use.remove(&name);
                }
            }
            Ok(())
        }

        async fn inspect(&self, id: &str) -> Result<Option<RuntimeStatus>, BlockadeError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.containers.get(id).map(|(_, running)| RuntimeStatus {
                running: *running,
                ip_address: Some("10.0.0.2".to_string()),
            }))
        }

        async fn logs(&self, _id: &str, _tail: Option<u64>) -> Result<String, BlockadeError> {
            Ok(String::new())
        }

        async fn exec(&self, _id: &str, _argv: &[&str]) -> Result<String, BlockadeError> {
            // No real `/sys/class/net` to read inside a fake container;
            // the resolver surfaces this as a failure and `start_one`
            // tolerates it by leaving `device` unset.
            Err(BlockadeError::HostExecError {
                command: "cat /sys/class/net/eth0/ifindex".to_string(),
                exit_code: 1,
                output: "no such container namespace in fake runtime".to_string(),
            })
        }

        async fn ensure_network(&self, name: &str) -> Result<(), BlockadeError> {
            self.inner.lock().unwrap().networks.insert(name.to_string());
            Ok(())
        }

        async fn remove_network(&self, name: &str) -> Result<(), BlockadeError> {
            self.inner.lock().unwrap().networks.remove(name);
            Ok(())
        }
    }

    /// In-memory [`HostExec`] fake: every call succeeds with an empty
    /// string unless a canned response was registered for that exact argv,
    /// which is enough for the firewall/traffic-shaper calls
    /// `TopologyManager` makes along the paths exercised here (no
    /// partitions or netem yet applied, so `iptables -L ...`/`tc ...`
    /// output being empty is itself the correct fixture).
    #[derive(Default)]
    struct FakeHostExec {
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl HostExec for FakeHostExec {
        async fn run(&self, argv: &[&str]) -> Result<String, BlockadeError> {
            self.calls.lock().unwrap().push(argv.join(" "));
            Ok(String::new())
        }

        async fn close(&self) -> Result<(), BlockadeError> {
            Ok(())
        }
    }

    fn harness(blockade_id: &str, dir: &std::path::Path) -> (TopologyManager, Arc<FakeRuntime>) {
        let runtime = Arc::new(FakeRuntime::default());
        let host_exec: Arc<dyn HostExec> = Arc::new(FakeHostExec::default());
        let firewall = FirewallController::new(Arc::clone(&host_exec), blockade_id);
        let shaper = TrafficShaper::new(Arc::clone(&host_exec));
        let resolver = InterfaceResolver::new(
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            Arc::clone(&host_exec),
        );
        let state = StateStore::new(dir.join(blockade_id));
        let audit = AuditLog::new(dir.join(blockade_id), blockade_id);
        let manager = TopologyManager::new(
            blockade_id.to_string(),
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            firewall,
            shaper,
            resolver,
            host_exec,
            state,
            audit,
        );
        (manager, runtime)
    }

    fn one_container_config() -> BlockadeConfig {
        BlockadeConfig::from_yaml_str("containers:\n  web:\n    image: busybox\n").unwrap()
    }

    #[tokio::test]
    async fn create_then_status_reports_up_container() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _runtime) = harness("t1", dir.path());

        let topology = manager.create(&one_container_config(), false).await.unwrap();
        assert_eq!(topology.containers.len(), 1);
        assert!(topology.container("web").unwrap().is_up());

        let status = manager.status().await.unwrap();
        assert!(status.container("web").unwrap().is_up());
        // The fake runtime's `exec` always fails, so the interface
        // resolver couldn't resolve a device; `create` tolerates that.
        assert!(status.container("web").unwrap().device.is_none());
    }

    #[tokio::test]
    async fn create_twice_without_destroy_is_already_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _runtime) = harness("t2", dir.path());

        manager.create(&one_container_config(), false).await.unwrap();
        let err = manager.create(&one_container_config(), false).await.unwrap_err();
        assert!(matches!(err, BlockadeError::AlreadyInitialized(_)));
    }

    #[tokio::test]
    async fn create_pre_checks_already_initialized_before_touching_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, runtime) = harness("t3", dir.path());

        manager.create(&one_container_config(), false).await.unwrap();
        let containers_before = runtime.inner.lock().unwrap().containers.len();
        assert!(manager.create(&one_container_config(), false).await.is_err());
        let containers_after = runtime.inner.lock().unwrap().containers.len();
        assert_eq!(containers_before, containers_after, "second create must not touch the runtime at all");
    }

    #[tokio::test]
    async fn create_without_force_surfaces_name_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, runtime) = harness("t4", dir.path());

        // Simulate a leftover container already holding the name this
        // topology would create under.
        runtime.inner.lock().unwrap().names_in_use.insert("t4_web".to_string());

        let err = manager.create(&one_container_config(), false).await.unwrap_err();
        assert!(matches!(err, BlockadeError::ContainerConflict(_)));
    }

    #[tokio::test]
    async fn create_with_force_removes_colliding_container_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, runtime) = harness("t5", dir.path());

        // A real leftover container, not just a reserved name: `force`
        // must actually remove it so the retried create can claim the
        // name, the same as Docker freeing the name once the colliding
        // container is gone.
        {
            let mut inner = runtime.inner.lock().unwrap();
            inner.containers.insert("fake-stale".to_string(), ("t5_web".to_string(), false));
            inner.names_in_use.insert("t5_web".to_string());
        }

        let topology = manager.create(&one_container_config(), true).await.unwrap();
        assert!(topology.container("web").unwrap().is_up());
        assert!(runtime.inner.lock().unwrap().containers.get("fake-stale").is_none());
    }

    #[tokio::test]
    async fn destroy_removes_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _runtime) = harness("t6", dir.path());

        manager.create(&one_container_config(), false).await.unwrap();
        manager.destroy().await.unwrap();
        assert!(!manager.state_dir_exists());
        assert!(manager.status().await.is_err());
    }

    #[tokio::test]
    async fn stop_then_start_round_trips_container_state() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _runtime) = harness("t7", dir.path());

        manager.create(&one_container_config(), false).await.unwrap();
        let stopped = manager.stop(&["web".to_string()]).await.unwrap();
        assert!(!stopped.container("web").unwrap().is_up());

        let started = manager.start(&["web".to_string()]).await.unwrap();
        assert!(started.container("web").unwrap().is_up());
    }

    #[tokio::test]
    async fn join_after_partition_clears_firewall_state() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _runtime) = harness("t8", dir.path());
        let config = BlockadeConfig::from_yaml_str(
            "containers:\n  a:\n    image: busybox\n  b:\n    image: busybox\n",
        )
        .unwrap();
        manager.create(&config, false).await.unwrap();

        let partitioned = manager
            .partition(&[vec!["a".to_string()], vec!["b".to_string()]])
            .await
            .unwrap();
        assert_eq!(partitioned.container("a").unwrap().partition, Some(1));
        assert_eq!(partitioned.container("b").unwrap().partition, Some(2));

        let joined = manager.join().await.unwrap();
        assert!(joined.containers.iter().all(|c| c.partition.is_none()));
    }

    #[tokio::test]
    async fn holy_container_rejects_partition_request() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _runtime) = harness("t9", dir.path());
        let config = BlockadeConfig::from_yaml_str(
            "containers:\n  a:\n    image: busybox\n  shrine:\n    image: busybox\n    holy: true\n",
        )
        .unwrap();
        manager.create(&config, false).await.unwrap();

        let err = manager
            .partition(&[vec!["shrine".to_string()]])
            .await
            .unwrap_err();
        assert!(matches!(err, BlockadeError::UsageError(_)));
    }
}
