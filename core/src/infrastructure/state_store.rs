// SPDX-License-Identifier: Apache-2.0

//! Persisted topology state: `.blockade/state.yml`, grounded on
//! `state.py::BlockadeStateFactory`.
//!
//! `initialize` uses an exclusive-create open so two concurrent `up`
//! invocations against the same data directory can't silently clobber each
//! other's state; `update` always overwrites, since by the time it's
//! called the caller already holds the topology's mutex (see
//! [`crate::application::facade::ControllerFacade`]).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::domain::errors::BlockadeError;
use crate::domain::topology::{PersistedState, STATE_DIR, STATE_FILE};

pub struct StateStore {
    data_dir: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        StateStore { data_dir: data_dir.into() }
    }

    fn state_path(&self) -> PathBuf {
        self.data_dir.join(STATE_DIR).join(STATE_FILE)
    }

    pub fn exists(&self) -> bool {
        self.state_path().is_file()
    }

    /// Create the state file for the first time. Fails with
    /// [`BlockadeError::AlreadyInitialized`] if one is already present.
    pub fn initialize(&self, state: &PersistedState) -> Result<(), BlockadeError> {
        let dir = self.data_dir.join(STATE_DIR);
        std::fs::create_dir_all(&dir).map_err(|source| BlockadeError::ConfigIo {
            path: dir.clone(),
            source,
        })?;

        let path = self.state_path();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::AlreadyExists {
                    BlockadeError::AlreadyInitialized(self.data_dir.clone())
                } else {
                    BlockadeError::ConfigIo { path: path.clone(), source }
                }
            })?;

        let yaml = serde_yaml::to_string(state).map_err(|e| BlockadeError::ConfigError(e.to_string()))?;
        file.write_all(yaml.as_bytes())
            .map_err(|source| BlockadeError::ConfigIo { path, source })
    }

    /// Overwrite the state file with `state`. The caller must already hold
    /// the in-process lock for this topology.
    pub fn update(&self, state: &PersistedState) -> Result<(), BlockadeError> {
        let path = self.state_path();
        let yaml = serde_yaml::to_string(state).map_err(|e| BlockadeError::ConfigError(e.to_string()))?;
        std::fs::write(&path, yaml).map_err(|source| BlockadeError::ConfigIo { path, source })
    }

    pub fn load(&self) -> Result<PersistedState, BlockadeError> {
        let path = self.state_path();
        if !path.is_file() {
            return Err(BlockadeError::NotInitialized(self.data_dir.clone()));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| BlockadeError::ConfigIo { path, source })?;
        serde_yaml::from_str(&text).map_err(|e| BlockadeError::InconsistentState(e.to_string()))
    }

    /// Remove the state file and its containing directory, if present.
    pub fn destroy(&self) -> Result<(), BlockadeError> {
        let dir = self.data_dir.join(STATE_DIR);
        if dir.is_dir() {
            std::fs::remove_dir_all(&dir).map_err(|source| BlockadeError::ConfigIo { path: dir, source })?;
        }
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::container::LiveContainer;

    fn sample_state() -> PersistedState {
        PersistedState::new(
            "test-blockade".to_string(),
            vec![],
            crate::domain::config::NetworkConfig::default(),
        )
    }

    #[test]
    fn initialize_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.initialize(&sample_state()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.blockade_id, "test-blockade");
    }

    #[test]
    fn initialize_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.initialize(&sample_state()).unwrap();
        let err = store.initialize(&sample_state()).unwrap_err();
        assert!(matches!(err, BlockadeError::AlreadyInitialized(_)));
    }

    #[test]
    fn load_without_initialize_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(matches!(store.load(), Err(BlockadeError::NotInitialized(_))));
    }

    #[test]
    fn update_overwrites_existing_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.initialize(&sample_state()).unwrap();

        let mut updated = sample_state();
        updated.containers.insert(
            "web".to_string(),
            LiveContainer {
                name: "web".to_string(),
                container_id: "abc123".to_string(),
                state: crate::domain::container::ContainerState::Up,
                ip_address: Some("10.0.0.2".to_string()),
                device: None,
                network_state: Default::default(),
                partition: None,
                neutral: false,
                holy: false,
            },
        );
        store.update(&updated).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.containers.len(), 1);
    }

    #[test]
    fn destroy_removes_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.initialize(&sample_state()).unwrap();
        store.destroy().unwrap();
        assert!(!store.exists());
    }
}
