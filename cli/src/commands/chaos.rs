// SPDX-License-Identifier: Apache-2.0

use blockade_core::domain::chaos::{ChaosEventKind, ChaosOptions};
use clap::Subcommand;

#[derive(Debug, Subcommand)]
pub enum ChaosAction {
    /// Start (or resume) randomly injecting faults against this topology.
    Start {
        #[command(flatten)]
        tuning: ChaosTuning,
    },
    /// Pause the chaos session and clear any currently-applied fault.
    Stop,
    /// Update the options of a stopped chaos session.
    Update {
        #[command(flatten)]
        tuning: ChaosTuning,
    },
    /// Tear down the chaos session entirely.
    Delete,
    /// Show the chaos session's current state.
    Status,
}

#[derive(Debug, clap::Args)]
pub struct ChaosTuning {
    /// Fault kinds the driver may pick between each tick.
    #[arg(long = "event", value_delimiter = ',', default_values_t = vec![
        "flaky".to_string(), "slow".to_string(), "duplicate".to_string(),
        "partition".to_string(), "stop".to_string(),
    ])]
    pub events: Vec<String>,
    /// Seconds to stay healthy before the next fault is applied (bounds).
    #[arg(long, default_value_t = 30)]
    pub min_wait: u64,
    #[arg(long, default_value_t = 300)]
    pub max_wait: u64,
    /// Seconds a fault stays applied before it's reversed (bounds).
    #[arg(long, default_value_t = 30)]
    pub min_run: u64,
    #[arg(long, default_value_t = 300)]
    pub max_run: u64,
    /// How many containers to target per tick (bounds).
    #[arg(long, default_value_t = 1)]
    pub min_containers: usize,
    #[arg(long, default_value_t = 1)]
    pub max_containers: usize,
}

pub fn parse_options(tuning: &ChaosTuning) -> anyhow::Result<ChaosOptions> {
    let event_kinds = if tuning.events.is_empty() {
        ChaosOptions::default().event_kinds
    } else {
        tuning
            .events
            .iter()
            .map(|e| parse_event_kind(e))
            .collect::<anyhow::Result<Vec<_>>>()?
    };
    Ok(ChaosOptions {
        event_kinds,
        min_start_delay_ms: tuning.min_wait.saturating_mul(1000),
        max_start_delay_ms: tuning.max_wait.saturating_mul(1000),
        min_run_ms: tuning.min_run.saturating_mul(1000),
        max_run_ms: tuning.max_run.saturating_mul(1000),
        min_containers: tuning.min_containers,
        max_containers: tuning.max_containers,
    })
}

fn parse_event_kind(s: &str) -> anyhow::Result<ChaosEventKind> {
    Ok(match s {
        "flaky" => ChaosEventKind::Flaky,
        "slow" => ChaosEventKind::Slow,
        "duplicate" => ChaosEventKind::Duplicate,
        "partition" => ChaosEventKind::Partition,
        "stop" => ChaosEventKind::Stop,
        other => anyhow::bail!("unknown chaos event kind '{other}'"),
    })
}
