// SPDX-License-Identifier: Apache-2.0

//! Rendering a [`Topology`] to the terminal, grounded on
//! `cli.py::print_containers`: a column table by default, or `--json` for
//! machine-readable output.

use blockade_core::domain::container::{ContainerState, NetworkState};
use blockade_core::domain::topology::Topology;

pub fn print_table(topology: &Topology) {
    println!(
        "{:<20} {:<16} {:<8} {:<15} {:<10} {:<10}",
        "NODE", "CONTAINER ID", "STATUS", "IP", "NETWORK", "PARTITION"
    );
    for c in &topology.containers {
        let status = match c.state {
            ContainerState::Up => "UP",
            ContainerState::Down => "DOWN",
            ContainerState::Missing => "MISSING",
        };
        let network = match c.network_state {
            NetworkState::Normal => "NORMAL",
            NetworkState::Slow => "SLOW",
            NetworkState::Flaky => "FLAKY",
            NetworkState::Duplicate => "DUPLICATE",
            NetworkState::Unknown => "UNKNOWN",
        };
        let partition = match c.partition {
            Some(p) => p.to_string(),
            None => "-".to_string(),
        };
        let name = if c.holy {
            format!("{} [H]", c.name)
        } else if c.neutral {
            format!("{} [N]", c.name)
        } else {
            c.name.clone()
        };
        let short_id: String = c.container_id.chars().take(12).collect();
        println!(
            "{:<20} {:<16} {:<8} {:<15} {:<10} {:<10}",
            name,
            short_id,
            status,
            c.ip_address.as_deref().unwrap_or("-"),
            network,
            partition
        );
    }
}

pub fn print_json(topology: &Topology) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(topology)?;
    println!("{json}");
    Ok(())
}
