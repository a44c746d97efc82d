// SPDX-License-Identifier: Apache-2.0

//! Infrastructure: everything that talks to the Docker API or the host
//! operating system. Grounded on `host.py`, `net.py`, and `state.py`, and
//! on the reference orchestrator's `infrastructure::runtime` for the
//! bollard wiring idiom.

pub mod audit_log;
pub mod docker_runtime;
pub mod firewall;
pub mod host_exec;
pub mod interface_resolver;
pub mod state_store;
pub mod traffic_shaper;

pub use audit_log::AuditLog;
pub use docker_runtime::{ContainerRuntime, DockerRuntime, RuntimeStatus};
pub use firewall::FirewallController;
pub use host_exec::{DockerHostExecutor, HostExec};
pub use interface_resolver::InterfaceResolver;
pub use state_store::StateStore;
pub use traffic_shaper::{NetemKind, TrafficShaper};
