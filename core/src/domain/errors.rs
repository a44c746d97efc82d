// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::chaos::{ChaosEvent, ChaosState};

/// The full error taxonomy for blockade-core.
///
/// Every variant maps to an HTTP status (via [`BlockadeError::status_code`])
/// and a CLI exit code, so the same value drives both surfaces.
#[derive(Debug, Error)]
pub enum BlockadeError {
    #[error("invalid blockade configuration: {0}")]
    ConfigError(String),

    #[error("failed to read configuration file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' is not a valid blockade/container name")]
    InvalidName(String),

    #[error("blockade is already initialized in {0}")]
    AlreadyInitialized(PathBuf),

    #[error("blockade has not been initialized in {0}")]
    NotInitialized(PathBuf),

    #[error("persisted state is inconsistent: {0}")]
    InconsistentState(String),

    #[error("container '{0}' is already defined in this topology")]
    ContainerConflict(String),

    #[error("container '{0}' not found in topology")]
    ContainerNotFound(String),

    #[error("insufficient permissions to perform this operation: {0}")]
    InsufficientPermissions(String),

    #[error("host command failed (exit {exit_code}): {command}\n{output}")]
    HostExecError {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("invalid chaos state transition: event {event:?} is not valid from state {state:?}")]
    InvalidTransition {
        state: ChaosState,
        event: ChaosEvent,
    },

    #[error("usage error: {0}")]
    UsageError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used to pick an HTTP status / process exit code
/// without every call site re-deriving it from the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller's fault: bad input, bad config, unknown name. Exit code 2 / HTTP 400-404.
    UserError,
    /// Operation could not complete for reasons outside caller's input.
    OperationalError,
}

impl BlockadeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BlockadeError::ConfigError(_)
            | BlockadeError::ConfigIo { .. }
            | BlockadeError::InvalidName(_)
            | BlockadeError::AlreadyInitialized(_)
            | BlockadeError::NotInitialized(_)
            | BlockadeError::ContainerConflict(_)
            | BlockadeError::ContainerNotFound(_)
            | BlockadeError::InvalidTransition { .. }
            | BlockadeError::UsageError(_) => ErrorClass::UserError,
            BlockadeError::InconsistentState(_)
            | BlockadeError::InsufficientPermissions(_)
            | BlockadeError::HostExecError { .. }
            | BlockadeError::Other(_) => ErrorClass::OperationalError,
        }
    }

    /// HTTP status code for the presentation layer.
    pub fn status_code(&self) -> u16 {
        match self {
            BlockadeError::ContainerNotFound(_) => 404,
            BlockadeError::NotInitialized(_) => 404,
            BlockadeError::AlreadyInitialized(_) => 409,
            BlockadeError::ContainerConflict(_) => 409,
            BlockadeError::InvalidName(_)
            | BlockadeError::ConfigError(_)
            | BlockadeError::ConfigIo { .. }
            | BlockadeError::InvalidTransition { .. }
            | BlockadeError::UsageError(_) => 400,
            BlockadeError::InsufficientPermissions(_) => 403,
            _ => 500,
        }
    }

    /// Process exit code for the CLI: 0 success (never constructed here), 1
    /// operational failure, 2 usage/input failure — matching the historical
    /// convention of the tool this replaces.
    pub fn exit_code(&self) -> i32 {
        match self.class() {
            ErrorClass::UserError => 2,
            ErrorClass::OperationalError => 1,
        }
    }
}
