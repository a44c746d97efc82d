// SPDX-License-Identifier: Apache-2.0

//! Drives a [`ChaosSession`] through its state machine, periodically
//! picking a random fault and a random targetable container and applying
//! it via the owning [`TopologyManager`].
//!
//! Grounded on `chaos.py::_BlockadeChaos`/`Chaos`: the event-handler
//! functions there (`_flaky`/`_partition`/`_slow`/`_duplicate`/`_stop`) map
//! to [`ChaosDriver::apply_fault`]'s match arms, and `_do_blockade_event`'s
//! random container/event selection maps to [`ChaosDriver::pick_event`].

use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::chaos::{error_state, transition, ChaosAction, ChaosEvent, ChaosEventKind, ChaosOptions, ChaosSession, ChaosState};
use crate::domain::errors::BlockadeError;
use crate::application::topology_manager::TopologyManager;

pub struct ChaosDriver {
    topology: Arc<TopologyManager>,
    session: Mutex<ChaosSession>,
    timer_handle: SyncMutex<Option<JoinHandle<()>>>,
}

impl ChaosDriver {
    pub fn new(topology: Arc<TopologyManager>, options: ChaosOptions) -> Arc<Self> {
        Arc::new(ChaosDriver {
            session: Mutex::new(ChaosSession::new(topology.blockade_id.clone(), options)),
            topology,
            timer_handle: SyncMutex::new(None),
        })
    }

    pub async fn state(&self) -> ChaosState {
        self.session.lock().await.state
    }

    pub async fn options(&self) -> ChaosOptions {
        self.session.lock().await.options.clone()
    }

    pub async fn update_options(&self, options: ChaosOptions) -> Result<(), BlockadeError> {
        let mut session = self.session.lock().await;
        if session.state != ChaosState::Stopped && session.state != ChaosState::New {
            return Err(BlockadeError::UsageError(
                "chaos options can only be changed while stopped".to_string(),
            ));
        }
        session.options = options;
        Ok(())
    }

    /// Feed `event` through the state machine, executing whatever action
    /// the transition calls for. On an error raised while executing the
    /// action, transitions to the matching `Failed*` state and returns the
    /// original error.
    pub async fn handle_event(self: &Arc<Self>, event: ChaosEvent) -> Result<ChaosState, BlockadeError> {
        let current = self.session.lock().await.state;
        let (next, action) = transition(current, event)?;

        let result = self.execute(action).await;

        let mut session = self.session.lock().await;
        match &result {
            Ok(()) => session.state = next,
            Err(_) => session.state = error_state(current),
        }
        let final_state = session.state;
        drop(session);

        if action == ChaosAction::Start {
            self.spawn_timer();
        }
        if matches!(action, ChaosAction::StopNoFault | ChaosAction::StopClearFault | ChaosAction::Cleanup) {
            self.cancel_timer().await;
        }

        result.map(|_| final_state)
    }

    async fn execute(&self, action: ChaosAction) -> Result<(), BlockadeError> {
        match action {
            ChaosAction::Start | ChaosAction::StaleTimer => Ok(()),
            ChaosAction::ApplyFault => self.apply_random_fault().await,
            ChaosAction::ClearFault | ChaosAction::StopClearFault => self.clear_fault().await,
            ChaosAction::StopNoFault | ChaosAction::Cleanup => Ok(()),
        }
    }

    /// Picks `k ∈ [min_containers, max_containers]` non-holy UP containers
    /// and a random permitted event per container. PARTITION picks are
    /// buffered and folded into one final call so each targeted container
    /// lands in its own singleton partition, rather than one call per
    /// container racing to clear the others' chains.
    async fn apply_random_fault(&self) -> Result<(), BlockadeError> {
        let (event_kinds, min_containers, max_containers) = {
            let session = self.session.lock().await;
            (session.options.event_kinds.clone(), session.options.min_containers, session.options.max_containers)
        };
        if event_kinds.is_empty() {
            return Ok(());
        }

        let topology = self.topology.status().await?;
        let candidates = topology.targetable_up_names();
        if candidates.is_empty() {
            return Ok(());
        }

        // Selection is pure randomness with no I/O, kept off the await
        // points below: `ThreadRng` isn't `Send` and can't be held live
        // across an `.await` on a multi-threaded runtime.
        let picks: Vec<(String, ChaosEventKind)> = {
            let mut rng = rand::thread_rng();
            let mut shuffled = candidates;
            shuffled.shuffle(&mut rng);
            let lo = min_containers.max(1).min(shuffled.len());
            let hi = max_containers.max(lo).min(shuffled.len());
            let k = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
            shuffled
                .into_iter()
                .take(k)
                .map(|name| {
                    let kind = *event_kinds.choose(&mut rng).expect("event_kinds is non-empty");
                    (name, kind)
                })
                .collect()
        };

        let mut partition_targets = Vec::new();
        for (target, kind) in picks {
            debug!(?kind, %target, "chaos driver applying fault");
            match kind {
                ChaosEventKind::Flaky => {
                    self.topology.flaky(&[target], None).await?;
                }
                ChaosEventKind::Slow => {
                    self.topology.slow(&[target], None).await?;
                }
                ChaosEventKind::Duplicate => {
                    self.topology.duplicate(&[target], None).await?;
                }
                ChaosEventKind::Stop => {
                    self.topology.stop(&[target]).await?;
                }
                ChaosEventKind::Partition => partition_targets.push(target),
            }
        }
        if !partition_targets.is_empty() {
            let groups: Vec<Vec<String>> = partition_targets.into_iter().map(|name| vec![name]).collect();
            self.topology.partition(&groups).await?;
        }
        Ok(())
    }

    /// Reset every targetable container to UP with a clear network, the
    /// way leaving DEGRADED always does: a prior STOP pick may have taken
    /// one down, so restart before clearing impairments and partitions.
    async fn clear_fault(&self) -> Result<(), BlockadeError> {
        let topology = self.topology.status().await?;
        let down: Vec<String> = topology
            .containers
            .iter()
            .filter(|c| !c.holy && !c.neutral && c.state != crate::domain::container::ContainerState::Up)
            .map(|c| c.name.clone())
            .collect();
        if !down.is_empty() {
            self.topology.start(&down).await?;
        }

        let names = topology.targetable_names();
        if !names.is_empty() {
            self.topology.fast(&names).await?;
        }
        self.topology.join().await?;
        Ok(())
    }

    fn spawn_timer(self: &Arc<Self>) {
        let driver = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let (min_ms, max_ms) = {
                    let session = driver.session.lock().await;
                    match session.state {
                        // Waiting in HEALTHY counts down the delay armed on
                        // entry to HEALTHY, before a fault is applied.
                        ChaosState::Healthy => (session.options.min_start_delay_ms, session.options.max_start_delay_ms),
                        // Waiting in DEGRADED counts down how long the
                        // applied fault stays in effect.
                        ChaosState::Degraded => (session.options.min_run_ms, session.options.max_run_ms),
                        _ => return,
                    }
                };
                let wait_ms = if max_ms > min_ms {
                    rand::thread_rng().gen_range(min_ms..=max_ms)
                } else {
                    min_ms
                };
                tokio::time::sleep(std::time::Duration::from_millis(wait_ms.max(1))).await;

                let state = driver.session.lock().await.state;
                if !matches!(state, ChaosState::Healthy | ChaosState::Degraded) {
                    return;
                }
                if let Err(e) = driver.handle_event(ChaosEvent::Timer).await {
                    warn!(error = %e, "chaos timer event failed");
                }
            }
        });
        *self.timer_handle.lock() = Some(handle);
    }

    async fn cancel_timer(&self) {
        let handle = self.timer_handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
