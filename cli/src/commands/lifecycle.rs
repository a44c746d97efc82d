// SPDX-License-Identifier: Apache-2.0

//! Container selection shared by every subcommand that acts on a subset of
//! a topology's containers: explicit names, `--all`, or `--random`.

use anyhow::{bail, Context};
use blockade_core::application::facade::ControllerFacade;
use clap::Args;
use rand::seq::SliceRandom;

#[derive(Debug, Args)]
pub struct Selection {
    /// Container names to act on.
    pub names: Vec<String>,

    /// Act on every container in the topology.
    #[arg(long, conflicts_with = "random")]
    pub all: bool,

    /// Act on one randomly-chosen container in the topology.
    #[arg(long)]
    pub random: bool,
}

impl Selection {
    /// Resolve this selection against the topology's current container
    /// list, applying `--all`/`--random` if given, otherwise validating
    /// that every explicitly-named container exists.
    pub async fn resolve(&self, facade: &ControllerFacade, blockade_id: &str) -> anyhow::Result<Vec<String>> {
        if !self.names.is_empty() && (self.all || self.random) {
            bail!("cannot combine explicit container names with --all or --random");
        }

        if self.all {
            let topology = facade.status(blockade_id).await.context("loading topology status")?;
            return Ok(topology.names());
        }

        if self.random {
            let topology = facade.status(blockade_id).await.context("loading topology status")?;
            let names = topology.names();
            let chosen = names
                .choose(&mut rand::thread_rng())
                .cloned()
                .context("topology has no containers to choose from")?;
            return Ok(vec![chosen]);
        }

        if self.names.is_empty() {
            bail!("specify one or more container names, or pass --all / --random");
        }

        Ok(self.names.clone())
    }
}
