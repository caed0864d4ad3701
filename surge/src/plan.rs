//! Validated, compiled form of a [`RunConfig`].
use crate::classifier::OutcomeClassifier;
use crate::pool::PoolConfig;
use crate::schedule::{CompositeSchedule, RateSchedule, TimedSchedule};
use std::time::Duration;
use surge_core::{ConfigError, RunConfig, Threshold};

#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub name: String,
    pub schedule: CompositeSchedule,
    pub pool: PoolConfig,
    pub graceful_stop: Duration,
    pub classifier: OutcomeClassifier,
}

/// Everything a run needs, checked up front so nothing is sent for an invalid configuration.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub scenarios: Vec<ScenarioPlan>,
    /// All scenario schedules superimposed on the run timeline.
    pub timeline: CompositeSchedule,
    pub thresholds: Vec<Threshold>,
    pub max_duration: Duration,
    pub progress_interval: Duration,
}

impl RunPlan {
    pub fn compile(config: &RunConfig) -> Result<Self, ConfigError> {
        if config.scenarios.is_empty() {
            return Err(ConfigError::NoScenarios);
        }

        let mut scenarios = Vec::with_capacity(config.scenarios.len());
        let mut timeline = CompositeSchedule::default();
        for (name, scenario) in &config.scenarios {
            scenario.validate(name)?;

            let (start_rate, stages) = scenario.stages();
            let schedule =
                RateSchedule::compile(start_rate, &stages).map_err(|source| ConfigError::Schedule {
                    scenario: name.clone(),
                    source,
                })?;
            let timed = TimedSchedule::new(scenario.start_time, schedule);
            timeline.push(timed.clone());

            scenarios.push(ScenarioPlan {
                name: name.clone(),
                schedule: CompositeSchedule::single(timed),
                pool: PoolConfig {
                    pre_allocated: scenario.pre_allocated_vus,
                    max_workers: scenario.max_vus(),
                    backlog: scenario.backlog,
                    request_timeout: scenario.request_timeout,
                },
                graceful_stop: scenario.graceful_stop,
                classifier: OutcomeClassifier::new(&scenario.checks),
            });
        }

        let max_duration = config.max_duration.unwrap_or_else(|| {
            scenarios
                .iter()
                .map(|s| s.schedule.end() + s.graceful_stop)
                .max()
                .unwrap_or_default()
        });

        Ok(Self {
            scenarios,
            timeline,
            thresholds: config.thresholds()?,
            max_duration,
            progress_interval: config.progress_interval,
        })
    }

    /// Requests the plan will fire if nothing stops it early.
    pub fn expected_requests(&self) -> f64 {
        self.timeline.total_count()
    }
}
