use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use vuload_metrics::SampleValue;

use crate::schedule::RampingSchedule;
use crate::signal::Signal;
use crate::state::RunState;

use super::iteration::IterationRunner;
use super::vu::{VuControl, VuState, run_vu};

#[derive(Debug, Clone, Copy)]
pub(crate) struct SchedulerSettings {
    pub tick: Duration,
    pub grace_period: Duration,
    pub spawn_jitter: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchedulerEvent {
    /// The plan ran out or an early stop was requested; every VU has been asked to retire.
    Draining,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SchedulerReport {
    pub cancelled: bool,
    pub interrupted_iterations: u64,
    pub spawned_vus: u64,
    pub peak_vus: u64,
}

struct VuSlot {
    control: Arc<VuControl>,
    handle: JoinHandle<()>,
}

/// Keeps the number of non-retiring VUs equal to the schedule's target, one control tick at
/// a time.
pub(crate) struct Scheduler {
    schedule: RampingSchedule,
    runner: Arc<IterationRunner>,
    settings: SchedulerSettings,
    cancel: Arc<Signal>,
    drain: Arc<Signal>,
    state: Arc<watch::Sender<RunState>>,
    vus: Vec<VuSlot>,
    next_id: u64,
    peak: u64,
}

impl Scheduler {
    pub fn new(
        schedule: RampingSchedule,
        runner: Arc<IterationRunner>,
        settings: SchedulerSettings,
        cancel: Arc<Signal>,
        drain: Arc<Signal>,
        state: Arc<watch::Sender<RunState>>,
    ) -> Self {
        Self {
            schedule,
            runner,
            settings,
            cancel,
            drain,
            state,
            vus: Vec::new(),
            next_id: 1,
            peak: 0,
        }
    }

    pub async fn run(mut self, events: mpsc::Sender<SchedulerEvent>) -> SchedulerReport {
        let started = Instant::now();
        let mut interval = tokio::time::interval(self.settings.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.cancel.wait() => {}
                _ = self.drain.wait() => {}
            }
            self.reap();

            let elapsed = started.elapsed();
            if self.cancel.is_set() || self.drain.is_set() || self.schedule.is_done(elapsed) {
                break;
            }

            let target = self.schedule.target_at(elapsed);
            self.rebalance(target);
            self.publish(elapsed, target);
        }

        let cancelled = self.cancel.is_set();
        if !cancelled {
            let _ = events.send(SchedulerEvent::Draining).await;
        }

        let interrupted_iterations = self.shutdown(started).await;
        SchedulerReport {
            cancelled: cancelled || self.cancel.is_set(),
            interrupted_iterations,
            spawned_vus: self.next_id - 1,
            peak_vus: self.peak,
        }
    }

    fn active_count(&self) -> u64 {
        self.vus
            .iter()
            .filter(|s| !s.control.is_retiring())
            .count() as u64
    }

    fn reap(&mut self) {
        self.vus.retain(|s| !s.handle.is_finished());
    }

    fn rebalance(&mut self, target: u64) {
        let active = self.active_count();
        if target > active {
            self.spawn(target - active);
        } else if target < active {
            self.retire(active - target);
        } else {
            return;
        }
        tracing::debug!(target, before = active, "rebalanced vus");
    }

    fn spawn(&mut self, count: u64) {
        let jitter = u64::try_from(self.settings.spawn_jitter.as_nanos()).unwrap_or(u64::MAX);
        let mut rng = rand::rng();

        for _ in 0..count {
            let id = self.next_id;
            self.next_id += 1;

            // Spread a burst of new VUs over the jitter window.
            let delay = if count > 1 && jitter > 0 {
                Duration::from_nanos(rng.random_range(0..jitter))
            } else {
                Duration::ZERO
            };

            let control = Arc::new(VuControl::new(id));
            let handle = tokio::spawn(run_vu(
                control.clone(),
                self.runner.clone(),
                self.cancel.clone(),
                delay,
            ));
            self.vus.push(VuSlot { control, handle });
        }

        let live = self.vus.len() as u64;
        if live > self.peak {
            self.peak = live;
            let _ = self
                .runner
                .builtin()
                .vus_max
                .add(SampleValue::Number(live as f64));
        }
    }

    /// Idle VUs go first, newest first; busy ones finish their iteration before stopping.
    fn retire(&mut self, mut count: u64) {
        for pass in [VuState::Idle, VuState::Busy] {
            for slot in self.vus.iter().rev() {
                if count == 0 {
                    return;
                }
                let c = &slot.control;
                if !c.is_retiring() && (pass == VuState::Busy || c.state() == VuState::Idle) {
                    c.retire();
                    count -= 1;
                }
            }
        }
    }

    fn publish(&self, elapsed: Duration, target: u64) {
        let active = self.active_count();
        let live = self.vus.len() as u64;
        let _ = self
            .runner
            .builtin()
            .vus
            .add(SampleValue::Number(live as f64));

        let stage = self.schedule.stage_snapshot_at(elapsed);
        let peak = self.peak;
        self.state.send_modify(|s| {
            s.elapsed = elapsed;
            if let Some(stage) = &stage {
                s.stage_index = stage.index;
                s.stage_count = stage.count;
                s.stage_elapsed = stage.stage_elapsed;
            }
            s.target_vus = target;
            s.active_vus = active;
            s.retiring_vus = live - active;
            s.peak_vus = peak;
        });
    }

    /// Retires every VU and waits for them, at most for the grace period. Returns how many
    /// iterations were still running when the stragglers were aborted.
    async fn shutdown(&mut self, started: Instant) -> u64 {
        for slot in &self.vus {
            slot.control.retire();
        }
        let deadline = Instant::now() + self.settings.grace_period;

        loop {
            self.reap();
            self.publish(started.elapsed(), 0);
            if self.vus.is_empty() {
                return 0;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(self.settings.tick)).await;
        }

        let mut interrupted = 0;
        for slot in self.vus.drain(..) {
            if slot.control.state() == VuState::Busy {
                interrupted += 1;
            }
            slot.handle.abort();
            if let Err(err) = slot.handle.await
                && err.is_panic()
            {
                tracing::error!(vu_id = slot.control.id(), "vu task panicked");
            }
        }

        if interrupted > 0 {
            let _ = self
                .runner
                .builtin()
                .interrupted_iterations
                .add(SampleValue::Number(interrupted as f64));
        }
        tracing::warn!(
            interrupted,
            grace_period = ?self.settings.grace_period,
            "grace period elapsed, aborted remaining vus"
        );
        self.publish(started.elapsed(), 0);
        interrupted
    }
}
