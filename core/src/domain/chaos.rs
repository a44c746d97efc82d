// SPDX-License-Identifier: Apache-2.0

//! The chaos driver's state machine: states, events, and the static
//! transition table. This module is pure data plus pure transition lookup —
//! actually carrying out an action (sleeping, picking a container, calling
//! into the network controllers) is the job of
//! [`crate::application::chaos_driver::ChaosDriver`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::errors::BlockadeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChaosState {
    /// Session created, no event loop running yet.
    New,
    /// Event loop running, network currently unimpaired.
    Healthy,
    /// Event loop running, a fault is currently applied.
    Degraded,
    /// Event loop paused; last-applied fault (if any) has been cleared.
    Stopped,
    /// Session deleted; terminal.
    Done,
    /// An action raised while transitioning out of [`ChaosState::Healthy`]
    /// or [`ChaosState::Stopped`] via `Start`/`Stop`.
    FailedHealthy,
    /// An action raised while transitioning out of [`ChaosState::Degraded`].
    FailedDegraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChaosEvent {
    /// Begin (or resume) the chaos event loop.
    Start,
    /// Pause the event loop and clear any currently-applied fault.
    Stop,
    /// The periodic driver timer fired.
    Timer,
    /// The session is being torn down entirely.
    Delete,
}

impl fmt::Display for ChaosState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The action a successful transition asks the driver to perform. Pure
/// data — execution lives in the application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaosAction {
    /// Arm the timer and move to [`ChaosState::Healthy`].
    Start,
    /// Choose and apply a fault against a target container.
    ApplyFault,
    /// Clear whatever fault is currently applied.
    ClearFault,
    /// Stop the timer; network already clear.
    StopNoFault,
    /// Clear the currently-applied fault, then stop the timer.
    StopClearFault,
    /// Release session resources.
    Cleanup,
    /// No-op: a timer fired for a session that is stopped/failed; drop it.
    StaleTimer,
}

/// Look up the table-driven transition for `(state, event)`.
///
/// Returns `(next_state, action)` on a legal transition, or
/// [`BlockadeError::InvalidTransition`] if `event` is not valid from
/// `state`. The caller is responsible for handling an error raised while
/// executing the returned action by transitioning to the matching
/// `Failed*` state instead (see
/// [`crate::application::chaos_driver::ChaosDriver::handle_event`]).
pub fn transition(state: ChaosState, event: ChaosEvent) -> Result<(ChaosState, ChaosAction), BlockadeError> {
    use ChaosAction::*;
    use ChaosEvent::*;
    use ChaosState::*;

    let result = match (state, event) {
        (New, Start) => (Healthy, Start),
        (Healthy, Timer) => (Degraded, ApplyFault),
        (Healthy, Stop) => (Stopped, StopNoFault),
        (Degraded, Timer) => (Healthy, ClearFault),
        (Degraded, Stop) => (Stopped, StopClearFault),
        (Stopped, Start) => (Healthy, Start),
        (Stopped, Delete) => (Done, Cleanup),
        (Stopped, Timer) => (Stopped, StaleTimer),
        (FailedHealthy, Timer) => (FailedHealthy, StaleTimer),
        (FailedHealthy, Delete) => (Done, Cleanup),
        (FailedDegraded, Timer) => (FailedDegraded, StaleTimer),
        (FailedDegraded, Delete) => (Done, Cleanup),
        (Done, Timer) => (Done, StaleTimer),
        _ => return Err(BlockadeError::InvalidTransition { state, event }),
    };
    Ok(result)
}

/// The state a failed transition out of `state` should land in, so the
/// driver can recover from an action that raised mid-transition.
pub fn error_state(state: ChaosState) -> ChaosState {
    match state {
        ChaosState::Degraded => ChaosState::FailedDegraded,
        _ => ChaosState::FailedHealthy,
    }
}

/// The kinds of network fault the chaos driver may choose between when a
/// [`ChaosAction::ApplyFault`] fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChaosEventKind {
    Flaky,
    Slow,
    Duplicate,
    Partition,
    Stop,
}

/// User-tunable parameters for a chaos session, set at creation and
/// updatable while the session is stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosOptions {
    /// Fault kinds eligible to be picked each timer tick.
    pub event_kinds: Vec<ChaosEventKind>,
    /// Bounds, in milliseconds, on the HEALTHY-state timer armed after a
    /// fault is cleared (or on session start).
    pub min_start_delay_ms: u64,
    pub max_start_delay_ms: u64,
    /// Bounds, in milliseconds, on the DEGRADED-state timer armed once a
    /// fault has been applied.
    pub min_run_ms: u64,
    pub max_run_ms: u64,
    /// Bounds on how many non-holy UP containers are selected per tick.
    pub min_containers: usize,
    pub max_containers: usize,
}

impl Default for ChaosOptions {
    fn default() -> Self {
        ChaosOptions {
            event_kinds: vec![
                ChaosEventKind::Flaky,
                ChaosEventKind::Slow,
                ChaosEventKind::Duplicate,
                ChaosEventKind::Partition,
                ChaosEventKind::Stop,
            ],
            min_start_delay_ms: 30_000,
            max_start_delay_ms: 300_000,
            min_run_ms: 30_000,
            max_run_ms: 300_000,
            min_containers: 1,
            max_containers: 1,
        }
    }
}

/// A chaos session bound to one topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosSession {
    pub blockade_id: String,
    pub state: ChaosState,
    pub options: ChaosOptions,
}

impl ChaosSession {
    pub fn new(blockade_id: String, options: ChaosOptions) -> Self {
        ChaosSession {
            blockade_id,
            state: ChaosState::New,
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_start_degrade_heal_stop_delete() {
        let mut state = ChaosState::New;
        let (next, action) = transition(state, ChaosEvent::Start).unwrap();
        assert_eq!(next, ChaosState::Healthy);
        assert_eq!(action, ChaosAction::Start);
        state = next;

        let (next, action) = transition(state, ChaosEvent::Timer).unwrap();
        assert_eq!(next, ChaosState::Degraded);
        assert_eq!(action, ChaosAction::ApplyFault);
        state = next;

        let (next, _) = transition(state, ChaosEvent::Timer).unwrap();
        assert_eq!(next, ChaosState::Healthy);
        state = next;

        let (next, _) = transition(state, ChaosEvent::Stop).unwrap();
        assert_eq!(next, ChaosState::Stopped);
        state = next;

        let (next, action) = transition(state, ChaosEvent::Delete).unwrap();
        assert_eq!(next, ChaosState::Done);
        assert_eq!(action, ChaosAction::Cleanup);
    }

    #[test]
    fn stale_timer_in_stopped_is_self_loop() {
        let (next, action) = transition(ChaosState::Stopped, ChaosEvent::Timer).unwrap();
        assert_eq!(next, ChaosState::Stopped);
        assert_eq!(action, ChaosAction::StaleTimer);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        assert!(transition(ChaosState::Done, ChaosEvent::Start).is_err());
        assert!(transition(ChaosState::New, ChaosEvent::Timer).is_err());
    }

    #[test]
    fn stale_timer_in_done_is_self_loop() {
        let (next, action) = transition(ChaosState::Done, ChaosEvent::Timer).unwrap();
        assert_eq!(next, ChaosState::Done);
        assert_eq!(action, ChaosAction::StaleTimer);
    }

    #[test]
    fn error_state_for_degraded_is_failed_degraded() {
        assert_eq!(error_state(ChaosState::Degraded), ChaosState::FailedDegraded);
        assert_eq!(error_state(ChaosState::Healthy), ChaosState::FailedHealthy);
    }
}
