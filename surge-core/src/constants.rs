use std::time::Duration;

/// Rate unit used when a scenario does not set `timeUnit`.
pub const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);

/// Grace period for in-flight requests once a scenario stops firing.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

/// Per-request timeout used when a scenario does not set `requestTimeout`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Capacity of the queue between the scheduler and the workers of a scenario.
pub const DEFAULT_BACKLOG: usize = 1024;

pub const DEFAULT_PRE_ALLOCATED_VUS: usize = 1;

/// How often a running test logs a progress line.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed tick of the arrival scheduler.
pub const SCHEDULER_TICK: Duration = Duration::from_millis(10);

/// How often buffered latency samples are folded into the percentile digest.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(250);

/// Status code the ingestion endpoint answers with when it accepts an event.
pub const ACCEPTED_STATUS: u16 = 202;

/// Percentiles always reported for request latency, in percent.
pub const SUMMARY_PERCENTILES: [f64; 4] = [50., 90., 95., 99.];
