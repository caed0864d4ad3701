use thiserror::Error;

/// Problems with a stage list that make it impossible to compile a rate schedule.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("A schedule needs at least one stage")]
    NoStages,

    #[error("Stage {index} has a zero duration; the rate change would be a discontinuous jump")]
    ZeroDuration { index: usize },

    #[error("Stage {index} has an invalid target rate {rate}")]
    InvalidRate { index: usize, rate: f64 },

    #[error("Invalid starting rate {0}")]
    InvalidStartRate(f64),
}

/// Invalid run configuration. Always raised before any request is sent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No scenarios configured")]
    NoScenarios,

    #[error("Scenario `{scenario}`: {source}")]
    Schedule {
        scenario: String,
        #[source]
        source: ScheduleError,
    },

    #[error("Scenario `{scenario}`: `timeUnit` must be greater than zero")]
    ZeroTimeUnit { scenario: String },

    #[error(
        "Scenario `{scenario}`: `maxVUs` ({max}) must be at least 1 and not below \
         `preAllocatedVUs` ({pre_allocated})"
    )]
    InvalidVus {
        scenario: String,
        pre_allocated: usize,
        max: usize,
    },

    #[error("Scenario `{scenario}`: `backlog` must be greater than zero")]
    ZeroBacklog { scenario: String },

    #[error("Scenario `{scenario}`: `requestTimeout` must be greater than zero")]
    ZeroRequestTimeout { scenario: String },

    #[error("Unknown metric `{0}` in thresholds")]
    UnknownMetric(String),

    #[error("Invalid threshold `{expression}` on `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("Metric `{metric}` does not support `{aggregation}`")]
    UnsupportedAggregation { metric: String, aggregation: String },
}
