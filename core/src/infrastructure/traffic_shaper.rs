// SPDX-License-Identifier: Apache-2.0

//! Linux `tc`/netem queueing-discipline control for per-container network
//! impairment (latency, loss, duplication), grounded on
//! `net.py::_TrafficControl`.

use std::sync::Arc;

use tracing::debug;

use crate::domain::container::NetworkState;
use crate::domain::errors::BlockadeError;
use crate::infrastructure::host_exec::HostExec;

pub struct TrafficShaper {
    host_exec: Arc<dyn HostExec>,
}

impl TrafficShaper {
    pub fn new(host_exec: Arc<dyn HostExec>) -> Self {
        TrafficShaper { host_exec }
    }

    async fn tc(&self, args: &[&str]) -> Result<String, BlockadeError> {
        let mut argv = vec!["tc"];
        argv.extend_from_slice(args);
        self.host_exec.run(&argv).await
    }

    /// Apply a netem discipline described by free-form `tc qdisc ... netem`
    /// parameters (e.g. `"30%"` for loss, `"75ms 100ms distribution
    /// normal"` for delay) to `device`. `replace` both installs a fresh
    /// qdisc and overwrites one already in place, so this needs no
    /// add-then-fallback dance.
    pub async fn netem(&self, device: &str, params: &str, kind: NetemKind) -> Result<(), BlockadeError> {
        debug!(%device, %params, ?kind, "applying netem discipline");
        let flag = kind.flag();
        let param_parts: Vec<&str> = params.split_whitespace().collect();
        let mut args = vec!["qdisc", "replace", "dev", device, "root", "netem", flag];
        args.extend(param_parts.iter());
        self.tc(&args).await?;
        Ok(())
    }

    /// Remove any netem discipline from `device`, restoring normal network
    /// behavior. `tc` exits 2 with "No such file or directory" when there
    /// was nothing to remove; that's treated as success, matching the
    /// original's idempotent `restore`.
    pub async fn restore(&self, device: &str) -> Result<(), BlockadeError> {
        match self.tc(&["qdisc", "del", "dev", device, "root"]).await {
            Ok(_) => Ok(()),
            Err(BlockadeError::HostExecError { exit_code, output, .. })
                if exit_code == 2 && output.contains("No such file or directory") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort classification of the currently-applied qdisc on
    /// `device`, by string-matching `tc qdisc show dev <device>`. Any exec
    /// failure is reported as `Unknown` rather than propagated, matching
    /// §4.3's "UNKNOWN on any error".
    pub async fn network_state(&self, device: &str) -> NetworkState {
        match self.tc(&["qdisc", "show", "dev", device]).await {
            Ok(output) => classify_qdisc(&output),
            Err(_) => NetworkState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetemKind {
    Loss,
    Delay,
    Duplicate,
}

impl NetemKind {
    fn flag(self) -> &'static str {
        match self {
            NetemKind::Loss => "loss",
            NetemKind::Delay => "delay",
            NetemKind::Duplicate => "duplicate",
        }
    }
}

fn classify_qdisc(output: &str) -> NetworkState {
    if output.contains(" delay ") {
        NetworkState::Slow
    } else if output.contains(" loss ") {
        NetworkState::Flaky
    } else if output.contains(" duplicate ") {
        NetworkState::Duplicate
    } else {
        NetworkState::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_qdisc_detects_delay() {
        let output = "qdisc netem 8001: root refcnt 2 limit 1000 delay 75.0ms 100.0ms\n";
        assert_eq!(classify_qdisc(output), NetworkState::Slow);
    }

    #[test]
    fn classify_qdisc_detects_loss() {
        let output = "qdisc netem 8001: root refcnt 2 limit 1000 loss 30%\n";
        assert_eq!(classify_qdisc(output), NetworkState::Flaky);
    }

    #[test]
    fn classify_qdisc_detects_normal() {
        let output = "qdisc pfifo_fast 0: root refcnt 2\n";
        assert_eq!(classify_qdisc(output), NetworkState::Normal);
    }
}
