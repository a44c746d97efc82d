// SPDX-License-Identifier: Apache-2.0

//! Domain types: the data model and pure algorithms of blockade, free of
//! any I/O. Everything here is grounded purely in Python `blockade`'s model
//! classes (`core.py::Container`, `net.py`, `state.py`, `chaos.py`,
//! `config.py`, `errors.py`), expressed as idiomatic Rust types.

pub mod audit;
pub mod chaos;
pub mod config;
pub mod container;
pub mod errors;
pub mod partition;
pub mod topology;

pub use audit::{AuditEvent, AuditStatus};
pub use chaos::{ChaosAction, ChaosEvent, ChaosEventKind, ChaosOptions, ChaosSession, ChaosState};
pub use config::BlockadeConfig;
pub use container::{ContainerConfig, ContainerState, LiveContainer, NetworkState};
pub use errors::{BlockadeError, ErrorClass};
pub use partition::PartitionSet;
pub use topology::{PersistedState, Topology};
