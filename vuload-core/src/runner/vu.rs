use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use crate::signal::Signal;

use super::iteration::IterationRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VuState {
    /// Between iterations, or waiting out its start delay.
    Idle,
    Busy,
    Stopped,
}

impl VuState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Busy,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Busy => 1,
            Self::Stopped => 2,
        }
    }
}

/// Shared between a VU task and the scheduler.
#[derive(Debug)]
pub struct VuControl {
    id: u64,
    state: AtomicU8,
    retire: Signal,
    iterations: AtomicU64,
}

impl VuControl {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(VuState::Idle.as_u8()),
            retire: Signal::new(),
            iterations: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> VuState {
        VuState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: VuState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Asks the VU to stop after its current iteration (or right away when idle).
    pub fn retire(&self) {
        self.retire.trigger();
    }

    pub fn is_retiring(&self) -> bool {
        self.retire.is_set()
    }

    pub fn completed_iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }
}

/// Iterates until retired or the run is cancelled. A retirement request never interrupts an
/// iteration in progress.
pub(crate) async fn run_vu(
    control: Arc<VuControl>,
    runner: Arc<IterationRunner>,
    cancel: Arc<Signal>,
    start_delay: Duration,
) {
    if !start_delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(start_delay) => {}
            _ = control.retire.wait() => {}
            _ = cancel.wait() => {}
        }
    }

    tracing::trace!(vu_id = control.id, "vu started");
    loop {
        if control.is_retiring() || cancel.is_set() {
            break;
        }

        control.set_state(VuState::Busy);
        let iteration = control.iterations.load(Ordering::Relaxed);
        runner.run(control.id, iteration).await;
        control.iterations.fetch_add(1, Ordering::Relaxed);
        control.set_state(VuState::Idle);

        // Keep a VU whose test function never awaits from starving the scheduler.
        tokio::task::yield_now().await;
    }

    control.set_state(VuState::Stopped);
    tracing::trace!(
        vu_id = control.id,
        iterations = control.completed_iterations(),
        "vu stopped"
    );
}
