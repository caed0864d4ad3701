use crate::MetricName;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Latency distribution of completed requests.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    /// Percentiles requested on top of the fixed set, as `(percent, value)`.
    pub extra: Vec<(f64, Duration)>,
}

impl LatencySummary {
    pub fn percentile(&self, percent: f64) -> Option<Duration> {
        const EPSILON: f64 = 1e-9;
        let fixed = [
            (50., self.p50),
            (90., self.p90),
            (95., self.p95),
            (99., self.p99),
            (100., self.max),
        ];
        fixed
            .iter()
            .chain(self.extra.iter())
            .find(|(p, _)| (p - percent).abs() < EPSILON)
            .map(|(_, value)| *value)
    }
}

/// Point-in-time view of everything the aggregator has seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub elapsed: Duration,
    /// Dispatched requests, whether they succeeded or not.
    pub requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub http_failures: u64,
    pub timeouts: u64,
    pub dropped_iterations: u64,
    pub interrupted: u64,
    pub latency: Option<LatencySummary>,
}

impl MetricsSnapshot {
    /// Every fire event ends up either dispatched or dropped.
    pub fn accounted(&self) -> u64 {
        self.requests + self.dropped_iterations
    }

    pub fn error_rate(&self) -> Option<f64> {
        ratio(self.failure_count, self.requests)
    }

    pub fn http_failed_rate(&self) -> Option<f64> {
        ratio(self.http_failures, self.requests)
    }

    pub fn request_rate(&self) -> Option<f64> {
        per_second(self.requests, self.elapsed)
    }

    pub fn dropped_rate(&self) -> Option<f64> {
        per_second(self.dropped_iterations, self.elapsed)
    }

    /// Observed values per metric, keyed the way thresholds name them. Latencies are in
    /// milliseconds.
    pub fn metric_values(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        let mut metrics = BTreeMap::new();

        if let Some(latency) = &self.latency {
            let mut values = BTreeMap::from([
                ("avg".to_string(), millis(latency.avg)),
                ("min".to_string(), millis(latency.min)),
                ("med".to_string(), millis(latency.p50)),
                ("max".to_string(), millis(latency.max)),
                ("p(90)".to_string(), millis(latency.p90)),
                ("p(95)".to_string(), millis(latency.p95)),
                ("p(99)".to_string(), millis(latency.p99)),
            ]);
            for (percent, value) in &latency.extra {
                values.insert(format!("p({percent})"), millis(*value));
            }
            metrics.insert(MetricName::HttpReqDuration.to_string(), values);
        }

        let mut reqs = BTreeMap::from([("count".to_string(), self.requests as f64)]);
        if let Some(rate) = self.request_rate() {
            reqs.insert("rate".to_string(), rate);
        }
        metrics.insert(MetricName::HttpReqs.to_string(), reqs);

        for (name, failures, rate) in [
            (
                MetricName::HttpReqFailed,
                self.http_failures,
                self.http_failed_rate(),
            ),
            (MetricName::Errors, self.failure_count, self.error_rate()),
        ] {
            let mut values = BTreeMap::from([
                ("passes".to_string(), failures as f64),
                ("fails".to_string(), self.requests.saturating_sub(failures) as f64),
            ]);
            if let Some(rate) = rate {
                values.insert("rate".to_string(), rate);
            }
            metrics.insert(name.to_string(), values);
        }

        let mut dropped = BTreeMap::from([("count".to_string(), self.dropped_iterations as f64)]);
        if let Some(rate) = self.dropped_rate() {
            dropped.insert("rate".to_string(), rate);
        }
        metrics.insert(MetricName::DroppedIterations.to_string(), dropped);

        metrics.insert(
            "outcomes".to_string(),
            BTreeMap::from([
                ("success".to_string(), self.success_count as f64),
                ("failure".to_string(), self.failure_count as f64),
                ("timeout".to_string(), self.timeouts as f64),
                ("interrupted".to_string(), self.interrupted as f64),
            ]),
        );

        metrics
    }
}

/// Result of one threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub threshold: String,
    pub observed: Option<f64>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// What one scenario did over the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub fired: u64,
    pub peak_workers: usize,
    pub peak_in_flight: usize,
    pub interrupted: u64,
    pub stopped_early: bool,
}

/// The single externally visible artifact of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub elapsed_secs: f64,
    pub metrics: BTreeMap<String, BTreeMap<String, f64>>,
    pub thresholds: Vec<ThresholdResult>,
    pub scenarios: BTreeMap<String, ScenarioReport>,
    pub passed: bool,
    #[serde(skip)]
    pub snapshot: MetricsSnapshot,
}

impl RunSummary {
    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.passed)
    }
}

pub fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1e6
}

fn ratio(part: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| part as f64 / total as f64)
}

fn per_second(count: u64, elapsed: Duration) -> Option<f64> {
    (!elapsed.is_zero()).then(|| count as f64 / elapsed.as_secs_f64())
}
