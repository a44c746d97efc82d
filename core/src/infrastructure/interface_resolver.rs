// SPDX-License-Identifier: Apache-2.0

//! Resolving a container's `eth0` to its host-side veth peer.
//!
//! Grounded on `net.py::get_container_device_index`/`get_container_device`:
//! there is no syscall that maps a container's `eth0` to its host veth
//! peer directly, so this relies on a documented kernel implementation
//! detail — the host-side veth's ifindex is one more than the container
//! side's ifindex — and confirms the guess against `ip link show` on the
//! host. This heuristic is fragile by nature and intentionally not
//! "fixed": it is the same approach the tool this replaces has always
//! used, and no portable alternative exists without CAP_SYS_ADMIN
//! namespace-entry tricks this project avoids.

use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::domain::errors::BlockadeError;
use crate::infrastructure::docker_runtime::ContainerRuntime;
use crate::infrastructure::host_exec::HostExec;

pub struct InterfaceResolver {
    runtime: Arc<dyn ContainerRuntime>,
    host_exec: Arc<dyn HostExec>,
}

impl InterfaceResolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, host_exec: Arc<dyn HostExec>) -> Self {
        InterfaceResolver { runtime, host_exec }
    }

    /// Resolve the host-side veth interface name for `container_id`'s
    /// `eth0`.
    pub async fn resolve(&self, container_id: &str) -> Result<String, BlockadeError> {
        let index = self.container_if_index(container_id).await?;
        let host_index = index + 1;
        let output = self.host_exec.run(&["ip", "link", "show"]).await?;
        device_for_index(&output, host_index).ok_or_else(|| {
            BlockadeError::InconsistentState(format!(
                "no host veth interface found at ifindex {host_index} (container ifindex {index})"
            ))
        })
    }

    async fn container_if_index(&self, container_id: &str) -> Result<u32, BlockadeError> {
        let output = self
            .runtime
            .exec(container_id, &["cat", "/sys/class/net/eth0/ifindex"])
            .await?;
        let index: u32 = output.trim().parse().map_err(|_| {
            BlockadeError::InconsistentState(format!(
                "unexpected ifindex output from container: '{}'",
                output.trim()
            ))
        })?;
        debug!(%container_id, index, "resolved container-side ifindex");
        Ok(index)
    }
}

/// Parse `ip link show` output looking for the interface whose numeric
/// index prefix matches `index`, e.g. `5: veth1234@if6: <...`.
fn device_for_index(output: &str, index: u32) -> Option<String> {
    let re = Regex::new(r"^(\d+):\s+([^:@]+)").expect("static regex is valid");
    for line in output.lines() {
        if let Some(caps) = re.captures(line) {
            if let Ok(found) = caps[1].parse::<u32>() {
                if found == index {
                    return Some(caps[2].to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_for_index_finds_matching_veth() {
        let output = "4: eth0@if5: <BROADCAST> mtu 1500\n\
                       5: veth1a2b3c@if4: <BROADCAST> mtu 1500\n\
                       6: veth9z8y7x@if10: <BROADCAST> mtu 1500\n";
        assert_eq!(device_for_index(output, 5), Some("veth1a2b3c".to_string()));
        assert_eq!(device_for_index(output, 6), Some("veth9z8y7x".to_string()));
        assert_eq!(device_for_index(output, 99), None);
    }
}
