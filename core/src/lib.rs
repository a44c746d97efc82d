// SPDX-License-Identifier: Apache-2.0
//! # blockade-core
//!
//! Network-fault injection for container-based distributed systems: bring
//! up a declared topology of Docker containers, then deliberately break
//! the network between them — latency, packet loss, duplication, full
//! partitions — to see how the system behaves under realistic failure.
//!
//! ## Layers
//!
//! | Layer | Module | Responsibility |
//! |---|---|---|
//! | Presentation | [`presentation`] | REST surface over the Controller Facade |
//! | Application | [`application`] | Controller Facade, Topology Manager, Chaos Driver |
//! | Domain | [`domain`] | Data model and pure algorithms: config, partitions, chaos state machine |
//! | Infrastructure | [`infrastructure`] | Docker API, host command execution, iptables/tc, persisted state |
//!
//! ```text
//! presentation  ──▶  application  ──▶  domain
//!                           │
//!                           ▼
//!                    infrastructure
//! ```
//!
//! Infrastructure depends on domain types but never the reverse; the
//! domain model has no knowledge of Docker, iptables, or the filesystem.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
