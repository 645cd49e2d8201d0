use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::errors::{PatcherError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlState {
    Running,
    Paused,
    Cancelled,
}

/// Shared pause/cancel switch. Every long-running step polls it between units of work.
#[derive(Clone)]
pub struct PatchControl {
    sender: Arc<watch::Sender<ControlState>>,
}

impl Default for PatchControl {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchControl {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(ControlState::Running);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn state(&self) -> ControlState {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControlState> {
        self.sender.subscribe()
    }

    pub fn pause(&self) {
        self.transition(ControlState::Paused);
    }

    pub fn resume(&self) {
        self.transition(ControlState::Running);
    }

    /// Cancellation is terminal; later pause/resume calls are ignored.
    pub fn cancel(&self) {
        self.sender.send_replace(ControlState::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == ControlState::Cancelled
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PatcherError::Cancelled);
        }
        Ok(())
    }

    pub async fn wait_for_running(&self) -> Result<()> {
        let mut control = self.subscribe();
        wait_for_running(&mut control).await
    }

    /// Resolves once the run is cancelled. Never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut control = self.subscribe();
        loop {
            if *control.borrow() == ControlState::Cancelled {
                return;
            }
            if control.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleeps for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let mut control = self.subscribe();
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            if *control.borrow() == ControlState::Cancelled {
                return Err(PatcherError::Cancelled);
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
                changed = control.changed() => {
                    if changed.is_err() {
                        tokio::time::sleep_until(deadline).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    fn transition(&self, next: ControlState) {
        self.sender.send_if_modified(|state| {
            if *state == ControlState::Cancelled || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}

pub async fn wait_for_running(control: &mut watch::Receiver<ControlState>) -> Result<()> {
    loop {
        let state = *control.borrow();
        match state {
            ControlState::Running => return Ok(()),
            ControlState::Paused => {
                control
                    .changed()
                    .await
                    .map_err(|_| PatcherError::InvalidOperation("patch control closed".to_string()))?;
            }
            ControlState::Cancelled => return Err(PatcherError::Cancelled),
        }
    }
}
