// SPDX-License-Identifier: Apache-2.0

pub mod chaos;
pub mod lifecycle;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::Context;
use blockade_core::application::facade::ControllerFacade;
use blockade_core::domain::config::BlockadeConfig;

use crate::Command;

/// Locate the topology config file the way `blockade/cli.py::load_config`
/// does: an explicit `--config` path, else `blockade.yaml`/`blockade.yml`
/// in the current directory, else an empty topology that containers can
/// later be `add`ed to.
fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<BlockadeConfig> {
    if let Some(path) = explicit {
        return BlockadeConfig::from_yaml_file(&path).context(format!("loading {}", path.display()));
    }
    for candidate in ["blockade.yaml", "blockade.yml"] {
        let path = Path::new(candidate);
        if path.is_file() {
            return BlockadeConfig::from_yaml_file(path).context(format!("loading {candidate}"));
        }
    }
    Ok(BlockadeConfig::empty())
}

fn blockade_id(name: Option<String>, data_dir: &Path) -> String {
    name.unwrap_or_else(|| {
        data_dir
            .canonicalize()
            .unwrap_or_else(|_| data_dir.to_path_buf())
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "blockade".to_string())
    })
}

pub async fn dispatch(
    command: Command,
    config_path: Option<PathBuf>,
    data_dir: PathBuf,
    name: Option<String>,
) -> anyhow::Result<()> {
    if let Command::Daemon { host, port } = command {
        return run_daemon(data_dir, host, port).await;
    }
    if let Command::Version = command {
        println!("blockade {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let facade = ControllerFacade::new(&data_dir).context("connecting to Docker")?;
    let id = blockade_id(name, &data_dir);

    match command {
        Command::Up { force } => {
            let config = load_config(config_path)?;
            let topology = facade.up(&id, &config, force).await?;
            status::print_table(&topology);
        }
        Command::Destroy => {
            facade.destroy(&id).await?;
            println!("destroyed '{id}'");
        }
        Command::Status { json } => {
            let topology = facade.status(&id).await?;
            if json {
                status::print_json(&topology)?;
            } else {
                status::print_table(&topology);
            }
        }
        Command::Start(selection) => {
            let names = selection.resolve(&facade, &id).await?;
            let topology = facade.start(&id, &names).await?;
            status::print_table(&topology);
        }
        Command::Stop(selection) => {
            let names = selection.resolve(&facade, &id).await?;
            let topology = facade.stop(&id, &names).await?;
            status::print_table(&topology);
        }
        Command::Restart(selection) => {
            let names = selection.resolve(&facade, &id).await?;
            let topology = facade.restart(&id, &names).await?;
            status::print_table(&topology);
        }
        Command::Kill { selection, signal } => {
            let names = selection.resolve(&facade, &id).await?;
            let topology = facade.kill(&id, &names, &signal).await?;
            status::print_table(&topology);
        }
        Command::Logs { container, tail } => {
            let output = facade.logs(&id, &container, tail).await?;
            print!("{output}");
        }
        Command::Flaky { selection, params } => {
            let names = selection.resolve(&facade, &id).await?;
            let topology = facade.flaky(&id, &names, params.as_deref()).await?;
            status::print_table(&topology);
        }
        Command::Slow { selection, params } => {
            let names = selection.resolve(&facade, &id).await?;
            let topology = facade.slow(&id, &names, params.as_deref()).await?;
            status::print_table(&topology);
        }
        Command::Duplicate { selection, params } => {
            let names = selection.resolve(&facade, &id).await?;
            let topology = facade.duplicate(&id, &names, params.as_deref()).await?;
            status::print_table(&topology);
        }
        Command::Fast(selection) => {
            let names = selection.resolve(&facade, &id).await?;
            let topology = facade.fast(&id, &names).await?;
            status::print_table(&topology);
        }
        Command::Partition { groups, random } => {
            let topology = if random {
                facade.random_partition(&id).await?
            } else {
                let groups: Vec<Vec<String>> = groups
                    .iter()
                    .map(|g| g.split(',').map(|s| s.trim().to_string()).collect())
                    .collect();
                facade.partition(&id, &groups).await?
            };
            status::print_table(&topology);
        }
        Command::Join => {
            let topology = facade.join(&id).await?;
            status::print_table(&topology);
        }
        Command::Add { name: container_name, container } => {
            let topology = facade.add(&id, &container_name, &container).await?;
            status::print_table(&topology);
        }
        Command::Events => {
            let events = facade.events(&id).await?;
            for event in events {
                println!(
                    "{} {} {:?} {}",
                    event.timestamp.to_rfc3339(),
                    event.event,
                    event.status,
                    event.message.unwrap_or_default()
                );
            }
        }
        Command::Chaos { action } => run_chaos(&facade, &id, action).await?,
        Command::Daemon { .. } => unreachable!("handled above"),
        Command::Version => unreachable!("handled above"),
    }

    Ok(())
}

async fn run_chaos(facade: &ControllerFacade, id: &str, action: chaos::ChaosAction) -> anyhow::Result<()> {
    match action {
        chaos::ChaosAction::Start { tuning } => {
            let options = chaos::parse_options(&tuning)?;
            let state = facade.chaos_start(id, options).await?;
            println!("chaos session state: {state}");
        }
        chaos::ChaosAction::Stop => {
            let state = facade.chaos_stop(id).await?;
            println!("chaos session state: {state}");
        }
        chaos::ChaosAction::Update { tuning } => {
            let options = chaos::parse_options(&tuning)?;
            facade.chaos_update_options(id, options).await?;
            println!("chaos options updated");
        }
        chaos::ChaosAction::Delete => {
            let state = facade.chaos_delete(id).await?;
            println!("chaos session state: {state}");
        }
        chaos::ChaosAction::Status => match facade.chaos_status(id).await? {
            Some(state) => println!("chaos session state: {state}"),
            None => println!("no chaos session for '{id}'"),
        },
    }
    Ok(())
}

async fn run_daemon(data_dir: PathBuf, host: String, port: u16) -> anyhow::Result<()> {
    use blockade_core::presentation::api::{router, AppState};
    use std::sync::Arc;

    let facade = Arc::new(ControllerFacade::new(&data_dir).context("connecting to Docker")?);
    let app = router(AppState { facade });

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await.context(format!("binding {addr}"))?;
    tracing::info!(%addr, "blockade daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running REST server")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blockade_id_defaults_to_data_dir_name() {
        let dir = tempfile::tempdir().unwrap();
        let id = blockade_id(None, dir.path());
        assert_eq!(id, dir.path().file_name().unwrap().to_string_lossy());
    }

    #[test]
    fn blockade_id_prefers_explicit_name() {
        let dir = tempfile::tempdir().unwrap();
        let id = blockade_id(Some("custom".to_string()), dir.path());
        assert_eq!(id, "custom");
    }

    #[test]
    fn load_config_with_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.yaml");
        std::fs::write(&path, "containers:\n  web:\n    image: busybox\n").unwrap();
        let config = load_config(Some(path)).unwrap();
        assert!(config.container("web").is_some());
    }

    #[test]
    fn load_config_without_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let result = load_config(None);
        std::env::set_current_dir(original).unwrap();
        assert!(result.unwrap().containers.is_empty());
    }
}
