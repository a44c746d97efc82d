// SPDX-License-Identifier: Apache-2.0

//! The live topology aggregate: the set of containers belonging to one
//! named blockade, their reconciled runtime state, and the on-disk
//! representation persisted between invocations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::config::NetworkConfig;
use crate::domain::container::LiveContainer;
use crate::domain::errors::BlockadeError;

/// Schema version of the persisted state file. Bumped whenever the on-disk
/// shape changes in a way that requires a migration.
pub const STATE_VERSION: u32 = 1;

/// The directory, relative to the data dir, holding per-topology state.
pub const STATE_DIR: &str = ".blockade";
/// The file name, inside [`STATE_DIR`], holding the persisted topology.
pub const STATE_FILE: &str = "state.yml";

/// Longest a topology id may be: it doubles as an iptables chain-name
/// prefix (see `domain::partition::chain_prefix`), which the kernel caps
/// well below this.
pub const MAX_ID_LEN: usize = 25;

/// Validate a topology identifier against `[a-zA-Z0-9.-]+`, non-empty, at
/// most [`MAX_ID_LEN`] characters — the same constraint that lets the
/// firewall controller build a chain-name prefix from it without
/// truncating away uniqueness.
pub fn validate_topology_id(id: &str) -> Result<(), BlockadeError> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(BlockadeError::InvalidName(id.to_string()));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-') {
        return Err(BlockadeError::InvalidName(id.to_string()));
    }
    Ok(())
}

/// Everything persisted to `.blockade/state.yml` between CLI/daemon
/// invocations: enough to reconstruct a [`Topology`] without re-reading the
/// original config file.
///
/// `containers` is keyed by container name, matching the documented
/// on-disk shape `containers: {<name>: {id: <runtime-id>, ...}}` (spec §6)
/// rather than a bare list — `state.py::BlockadeStateFactory` persists the
/// same name-keyed mapping. Each value carries more than the documented
/// `id` field (cached state/neutral/holy) because a CLI invocation is a
/// fresh process per command and never re-reads the topology config file
/// after `up`, so this is the only place that survives to tell a later
/// `partition`/`chaos` command which containers are holy/neutral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub blockade_id: String,
    pub containers: BTreeMap<String, LiveContainer>,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl PersistedState {
    pub fn new(blockade_id: String, containers: Vec<LiveContainer>, network: NetworkConfig) -> Self {
        PersistedState {
            version: STATE_VERSION,
            blockade_id,
            containers: containers.into_iter().map(|c| (c.name.clone(), c)).collect(),
            network,
        }
    }
}

/// A live, in-memory view of one topology: its identity and the containers
/// brought up for it. This is the aggregate the application layer operates
/// on; it is rebuilt from [`PersistedState`] at the start of each operation
/// and flushed back to disk at the end of mutating ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub blockade_id: String,
    pub containers: Vec<LiveContainer>,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Topology {
    pub fn from_persisted(state: PersistedState) -> Self {
        Topology {
            blockade_id: state.blockade_id,
            containers: state.containers.into_values().collect(),
            network: state.network,
        }
    }

    pub fn to_persisted(&self) -> PersistedState {
        PersistedState::new(self.blockade_id.clone(), self.containers.clone(), self.network.clone())
    }

    pub fn container(&self, name: &str) -> Option<&LiveContainer> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut LiveContainer> {
        self.containers.iter_mut().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.containers.iter().map(|c| c.name.clone()).collect()
    }

    /// Names of containers eligible for chaos/partition targeting: not
    /// neutral, not holy.
    pub fn targetable_names(&self) -> Vec<String> {
        self.containers
            .iter()
            .filter(|c| !c.neutral && !c.holy)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Names of currently-UP containers eligible for the chaos driver to
    /// pick as a fault target (§4.7: "the non-holy UP containers").
    pub fn targetable_up_names(&self) -> Vec<String> {
        self.containers
            .iter()
            .filter(|c| c.is_up() && !c.neutral && !c.holy)
            .map(|c| c.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::container::ContainerState;

    fn container(name: &str, state: ContainerState, neutral: bool, holy: bool) -> LiveContainer {
        LiveContainer {
            name: name.to_string(),
            container_id: format!("id-{name}"),
            state,
            ip_address: None,
            device: None,
            network_state: Default::default(),
            partition: None,
            neutral,
            holy,
        }
    }

    #[test]
    fn targetable_up_names_excludes_down_neutral_and_holy() {
        let topology = Topology {
            blockade_id: "t".to_string(),
            containers: vec![
                container("up", ContainerState::Up, false, false),
                container("down", ContainerState::Down, false, false),
                container("neutral", ContainerState::Up, true, false),
                container("holy", ContainerState::Up, false, true),
            ],
            network: NetworkConfig::default(),
        };
        assert_eq!(topology.targetable_up_names(), vec!["up".to_string()]);
    }

    #[test]
    fn validate_topology_id_accepts_name_chars() {
        assert!(validate_topology_id("my-topology.1").is_ok());
    }

    #[test]
    fn validate_topology_id_rejects_empty() {
        assert!(validate_topology_id("").is_err());
    }

    #[test]
    fn validate_topology_id_rejects_over_25_chars() {
        assert!(validate_topology_id("abc123awhopbopaloobopalopbamboom").is_err());
    }

    #[test]
    fn validate_topology_id_rejects_disallowed_chars() {
        assert!(validate_topology_id("not/valid").is_err());
        assert!(validate_topology_id("not valid").is_err());
    }
}
