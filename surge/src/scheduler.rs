//! Open-loop arrival scheduler.
//!
//! Fire events are derived from the schedule's integral rather than from responses, so a slow
//! target never slows the offered load down.
use crate::schedule::CompositeSchedule;
use crate::stop::{StopMode, StopSignal};
use std::time::Duration;
use surge_core::{FireEvent, SCHEDULER_TICK};
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn};

mod timer;
use timer::Timer;

/// Absorbs float error so an integral landing exactly on an integer fires on time.
const DUE_EPSILON: f64 = 1e-9;

pub struct ArrivalScheduler {
    name: String,
    schedule: CompositeSchedule,
    tick: Duration,
    stop: StopSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerReport {
    pub fired: u64,
    /// Set when a stop request ended the schedule before its natural end.
    pub stopped: Option<StopMode>,
}

impl ArrivalScheduler {
    pub fn new(name: impl Into<String>, schedule: CompositeSchedule, stop: StopSignal) -> Self {
        Self {
            name: name.into(),
            schedule,
            tick: SCHEDULER_TICK,
            stop,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Drives `fire` until the schedule ends or a stop is requested. Offsets in the emitted
    /// events are relative to `start`.
    #[instrument(name = "scheduler", skip_all, fields(name = %self.name))]
    pub async fn run<F>(self, start: Instant, mut fire: F) -> SchedulerReport
    where
        F: FnMut(FireEvent),
    {
        let Self {
            name,
            schedule,
            tick,
            mut stop,
        } = self;
        let end = schedule.end();

        #[cfg(feature = "metrics")]
        let goal_gauge = metrics::gauge!("surge_goal_rate", "scenario" => name.clone());

        let mut timer = Timer::new(tick).await;
        debug!(
            "Scheduling {:.0} requests over {} (tick {timer})",
            schedule.total_count(),
            humantime::format_duration(end)
        );

        let mut fired = 0u64;
        loop {
            let mode = stop.mode();
            if mode != StopMode::Running {
                info!("Stopped scheduler {name} after {fired} events ({mode:?})");
                break SchedulerReport {
                    fired,
                    stopped: Some(mode),
                };
            }

            let elapsed = start.elapsed().min(end);
            let due = due_count(&schedule, elapsed);
            while fired < due {
                fire(FireEvent {
                    seq: fired,
                    scheduled: elapsed,
                });
                fired += 1;
            }

            #[cfg(feature = "metrics")]
            goal_gauge.set(schedule.rate_at(elapsed));

            if elapsed >= end {
                #[cfg(feature = "metrics")]
                goal_gauge.set(0.);
                debug!("Schedule for {name} complete, {fired} events fired");
                break SchedulerReport {
                    fired,
                    stopped: None,
                };
            }

            tokio::select! {
                biased;
                _ = stop.reached(StopMode::Graceful) => {}
                _ = timer.tick() => {}
            }
        }
    }
}

fn due_count(schedule: &CompositeSchedule, elapsed: Duration) -> u64 {
    (schedule.expected_count(elapsed) + DUE_EPSILON).floor() as u64
}
