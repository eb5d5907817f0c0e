//! Inventory session state machine.
//!
//! ```text
//! Idle ──start(FastSwitch)──► RunningFastSwitch ──stop()──► Idle
//! Idle ──start(SessionTarget)► RunningSessionTarget ─stop()─► Idle
//! ```
//!
//! There is no transition between the two running states. Polling models
//! get a background task that resends the inventory command every interval;
//! continuous models get a single command and stream until stopped.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::InventorySettings;
use crate::error::Result;
use crate::event::DriverEvent;
use crate::protocol::{InventoryMode, InventoryStrategy, ProtocolDescriptor};
use crate::writer::Transmitter;

/// Inventory state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    RunningFastSwitch,
    RunningSessionTarget,
}

impl SessionState {
    pub fn running(mode: InventoryMode) -> Self {
        match mode {
            InventoryMode::FastSwitch => SessionState::RunningFastSwitch,
            InventoryMode::SessionTarget => SessionState::RunningSessionTarget,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }
}

/// Starts and stops inventory on one connection.
pub struct SessionController {
    transmitter: Transmitter,
    state: Arc<watch::Sender<SessionState>>,
    /// Also serializes start/stop/force_idle.
    poller: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
}

impl SessionController {
    pub fn new(transmitter: Transmitter, interval: Duration) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            transmitter,
            state: Arc::new(state),
            poller: Mutex::new(None),
            interval,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Start an inventory.
    ///
    /// Returns `Ok(false)` without sending anything when a session is
    /// already running. The first inventory command is written before this
    /// returns, so a dead transport fails here rather than in the poller.
    pub async fn start(
        &self,
        descriptor: &Arc<dyn ProtocolDescriptor>,
        mode: InventoryMode,
        settings: &InventorySettings,
    ) -> Result<bool> {
        let mut poller = self.poller.lock().await;

        let current = self.state();
        if !current.is_idle() {
            tracing::debug!(?current, ?mode, "Inventory start rejected");
            return Ok(false);
        }

        let command = descriptor.inventory_command(mode, settings)?;
        self.transmitter.transmit(command.clone()).await?;

        let running = SessionState::running(mode);
        set_state(&self.state, &self.transmitter, running);

        if descriptor.inventory_strategy() == InventoryStrategy::Polling {
            *poller = Some(tokio::spawn(poll_inventory(
                self.transmitter.clone(),
                self.state.clone(),
                running,
                command,
                self.interval,
            )));
        }
        Ok(true)
    }

    /// Stop the running inventory and send the reader's stop command.
    ///
    /// Returns `Ok(false)` when already idle.
    pub async fn stop(&self, descriptor: &Arc<dyn ProtocolDescriptor>) -> Result<bool> {
        let mut poller = self.poller.lock().await;

        if self.state().is_idle() {
            tracing::debug!("Inventory stop ignored, already idle");
            return Ok(false);
        }

        if let Some(task) = poller.take() {
            task.abort();
        }
        set_state(&self.state, &self.transmitter, SessionState::Idle);

        let command = descriptor.stop_command()?;
        self.transmitter.transmit(command).await?;
        Ok(true)
    }

    /// Go idle without talking to the reader. Used when the link is gone or
    /// the reader ended the inventory itself.
    pub async fn force_idle(&self) -> bool {
        let mut poller = self.poller.lock().await;
        if let Some(task) = poller.take() {
            task.abort();
        }
        if self.state().is_idle() {
            return false;
        }
        set_state(&self.state, &self.transmitter, SessionState::Idle);
        true
    }

    /// Stop the poller from a context that cannot await. The state is left
    /// as is.
    pub fn halt_poller(&self) {
        if let Ok(mut poller) = self.poller.try_lock() {
            if let Some(task) = poller.take() {
                task.abort();
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(task) = self.poller.get_mut().take() {
            task.abort();
        }
    }
}

fn set_state(state: &watch::Sender<SessionState>, transmitter: &Transmitter, next: SessionState) {
    let previous = state.send_replace(next);
    if previous != next {
        tracing::debug!(from = ?previous, to = ?next, "Session state changed");
        transmitter.events().emit(DriverEvent::SessionChanged(next));
    }
}

/// Resend `command` every `period` while the session stays in `running`.
async fn poll_inventory(
    transmitter: Transmitter,
    state: Arc<watch::Sender<SessionState>>,
    running: SessionState,
    command: Vec<u8>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if *state.borrow() != running {
            return;
        }

        if let Err(e) = transmitter.transmit(command.clone()).await {
            tracing::error!("Inventory poll failed, stopping session: {}", e);
            let stopped = state.send_if_modified(|current| {
                if *current == running {
                    *current = SessionState::Idle;
                    true
                } else {
                    false
                }
            });
            if stopped {
                transmitter
                    .events()
                    .emit(DriverEvent::SessionChanged(SessionState::Idle));
            }
            return;
        }
    }
}
