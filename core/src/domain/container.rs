// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Network-path fault state applied to a single container's veth, as last
/// observed or last requested. Mirrors the qdisc/iptables state a container
/// can be in at any one time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Normal,
    Slow,
    Flaky,
    Duplicate,
    /// The live qdisc/iptables state didn't match any of the known shapes.
    Unknown,
}

impl Default for NetworkState {
    fn default() -> Self {
        NetworkState::Normal
    }
}

/// One entry of a container's `links:` declaration: the other container in
/// this topology it should reach, and the hostname alias it's reachable
/// under (defaults to the target's own name when no alias is given).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTarget {
    pub name: String,
    pub alias: String,
}

/// Declared configuration for one container, as parsed out of the topology
/// config file (after `count` expansion and `${VAR}` substitution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    /// Explicit container-runtime name to create this container under.
    /// Defaults to `name` (the topology-local name) when absent; set this
    /// to adopt a naming scheme distinct from the topology's own, while
    /// `name` keeps identifying the container within this crate.
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub links: Vec<LinkTarget>,
    #[serde(default)]
    pub volumes: HashMap<String, String>,
    #[serde(default)]
    pub publish_ports: HashMap<String, String>,
    #[serde(default)]
    pub expose_ports: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub start_delay: u64,
    /// Neutral containers are excluded from chaos/partition targeting by
    /// default (e.g. a log collector that should never be cut off).
    #[serde(default)]
    pub neutral: bool,
    /// Holy containers can never be partitioned away from any other
    /// container, even across multiple overlapping partition requests.
    #[serde(default)]
    pub holy: bool,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub dns: Vec<String>,
}

impl ContainerConfig {
    /// The name this container is actually created under on the runtime.
    pub fn runtime_name(&self) -> &str {
        self.container_name.as_deref().unwrap_or(&self.name)
    }
}

/// Reconciled state of a container as actually observed on the runtime at
/// status time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerState {
    Up,
    Down,
    /// Declared in the topology but no longer present on the runtime at all
    /// (removed out-of-band).
    Missing,
}

/// A container actually brought up on the container runtime, with its
/// current observed/last-known state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveContainer {
    pub name: String,
    pub container_id: String,
    pub state: ContainerState,
    pub ip_address: Option<String>,
    /// Host-side veth device name resolved for this container's `eth0`, if
    /// any (absent when the container is down or never had one resolved).
    pub device: Option<String>,
    #[serde(default)]
    pub network_state: NetworkState,
    /// Partition group index this container currently belongs to, if the
    /// topology is currently partitioned.
    #[serde(default)]
    pub partition: Option<usize>,
    #[serde(default)]
    pub neutral: bool,
    #[serde(default)]
    pub holy: bool,
}

impl LiveContainer {
    pub fn is_up(&self) -> bool {
        matches!(self.state, ContainerState::Up)
    }
}
