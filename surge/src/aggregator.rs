use metrics_util::AtomicBucket;
use pdatastructs::tdigest::{TDigest, K1};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use surge_core::{ErrorKind, LatencySummary, MetricsSnapshot, Outcome, SUMMARY_PERCENTILES};
use tokio::time::Instant;
use tracing::error;

const TDIGEST_COMPRESSION: f64 = 100.;
const TDIGEST_BACKLOG_SIZE: usize = 100;

/// Shared sink for every outcome of a run.
///
/// Recording never blocks: counters are atomics and latency samples land in a lock-free bucket.
/// The bucket is folded into a t-digest by [`flush`](Self::flush), which the run calls
/// periodically, and by every snapshot.
pub struct MetricsAggregator {
    started: Instant,
    requests: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    http_failures: AtomicU64,
    timeouts: AtomicU64,
    dropped: AtomicU64,
    interrupted: AtomicU64,
    latency_count: AtomicU64,
    latency_sum: AtomicU64,
    latency_min: AtomicU64,
    latency_max: AtomicU64,
    samples: AtomicBucket<Duration>,
    digest: Mutex<TDigest<K1>>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        #[cfg(feature = "metrics")]
        {
            metrics::describe_counter!("surge_requests_total", "Dispatched requests by result");
            metrics::describe_counter!(
                "surge_dropped_iterations_total",
                "Fire events dropped because the worker pool was saturated"
            );
            metrics::describe_histogram!(
                "surge_request_latency",
                metrics::Unit::Seconds,
                "Request latency"
            );
        }

        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            http_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            interrupted: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            latency_sum: AtomicU64::new(0),
            latency_min: AtomicU64::new(u64::MAX),
            latency_max: AtomicU64::new(0),
            samples: AtomicBucket::new(),
            digest: Mutex::new(default_tdigest()),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn record(&self, outcome: &Outcome) {
        if outcome.error_kind == Some(ErrorKind::Dropped) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            metrics::counter!("surge_dropped_iterations_total").increment(1);
            return;
        }

        self.requests.fetch_add(1, Ordering::Relaxed);
        if outcome.success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.http_failed {
            self.http_failures.fetch_add(1, Ordering::Relaxed);
        }
        match outcome.error_kind {
            Some(ErrorKind::Timeout) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Some(ErrorKind::Interrupted) => {
                self.interrupted.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        #[cfg(feature = "metrics")]
        {
            let result = if outcome.success { "success" } else { "failure" };
            metrics::counter!("surge_requests_total", "result" => result).increment(1);
        }

        if outcome.has_latency() {
            let nanos = u64::try_from(outcome.latency.as_nanos()).unwrap_or(u64::MAX);
            self.latency_sum.fetch_add(nanos, Ordering::Relaxed);
            self.latency_min.fetch_min(nanos, Ordering::Relaxed);
            self.latency_max.fetch_max(nanos, Ordering::Relaxed);
            // Published last so readers never see a count without its min/max.
            self.latency_count.fetch_add(1, Ordering::Release);
            self.samples.push(outcome.latency);

            #[cfg(feature = "metrics")]
            metrics::histogram!("surge_request_latency").record(outcome.latency.as_secs_f64());
        }
    }

    /// Folds pending latency samples into the digest.
    ///
    /// Samples go in as whole microseconds: integral values keep the digest's centroid sums
    /// exact, so its means stay ordered even when thousands of samples are identical.
    pub fn flush(&self) {
        let mut digest = self.digest.lock().unwrap_or_else(PoisonError::into_inner);
        self.samples.clear_with(|batch| {
            for latency in batch {
                digest.insert(latency.as_micros() as f64);
            }
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_with(&[])
    }

    /// Like [`snapshot`](Self::snapshot), additionally estimating the given percentiles.
    pub fn snapshot_with(&self, extra_percentiles: &[f64]) -> MetricsSnapshot {
        self.flush();

        MetricsSnapshot {
            elapsed: self.elapsed(),
            requests: self.requests.load(Ordering::Relaxed),
            success_count: self.success.load(Ordering::Relaxed),
            failure_count: self.failure.load(Ordering::Relaxed),
            http_failures: self.http_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            dropped_iterations: self.dropped.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            latency: self.latency_summary(extra_percentiles),
        }
    }

    fn latency_summary(&self, extra_percentiles: &[f64]) -> Option<LatencySummary> {
        let count = self.latency_count.load(Ordering::Acquire);
        if count == 0 {
            return None;
        }
        let min = self.latency_min.load(Ordering::Relaxed);
        let max = self.latency_max.load(Ordering::Relaxed);
        if min > max {
            return None;
        }
        let (min, max) = (Duration::from_nanos(min), Duration::from_nanos(max));
        let avg = Duration::from_nanos(self.latency_sum.load(Ordering::Relaxed) / count);

        let digest = self.digest.lock().unwrap_or_else(PoisonError::into_inner);
        let percentile = |percent: f64| {
            if min == max || digest.is_empty() {
                return min;
            }
            let micros = digest.quantile(percent / 100.);
            // TDigest occasionally yields NaN on tiny inputs.
            let micros = if micros.is_finite() {
                micros
            } else {
                error!("NaN latency estimate for p({percent})");
                0.
            };
            Duration::from_secs_f64(micros.max(0.) / 1e6).clamp(min, max)
        };

        let [p50, p90, p95, p99] = SUMMARY_PERCENTILES.map(&percentile);
        let extra = extra_percentiles
            .iter()
            .filter(|p| !SUMMARY_PERCENTILES.contains(*p))
            .map(|p| (*p, percentile(*p)))
            .collect();

        Some(LatencySummary {
            min,
            max,
            avg,
            p50,
            p90,
            p95,
            p99,
            extra,
        })
    }
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(TDIGEST_COMPRESSION), TDIGEST_BACKLOG_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn median_of_uniform_samples() {
        let mut latencies: Vec<u64> = (1..=100).collect();
        latencies.shuffle(&mut SmallRng::seed_from_u64(0));

        let aggregator = MetricsAggregator::new();
        for v in latencies {
            aggregator.record(&Outcome::success(ms(v)));
        }

        let latency = aggregator.snapshot().latency.unwrap();
        let p50 = latency.p50.as_secs_f64() * 1000.;
        assert!((p50 - 50.5).abs() <= 5., "p50 = {p50}");
        assert_eq!(latency.min, ms(1));
        assert_eq!(latency.max, ms(100));
        assert_eq!(latency.avg, Duration::from_micros(50_500));
        assert!(latency.p50 <= latency.p90);
        assert!(latency.p90 <= latency.p95);
        assert!(latency.p95 <= latency.p99);
    }

    #[test]
    fn counts_each_outcome_kind() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(&Outcome::success(ms(5)));
        aggregator.record(&Outcome::success(ms(7)));
        aggregator.record(&Outcome::timeout(ms(1000)));
        let check = ErrorKind::Check("status is 202".into());
        aggregator.record(&Outcome::failure(ms(3), false, check));
        aggregator.record(&Outcome::dropped());
        aggregator.record(&Outcome::interrupted(ms(9000)));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.requests, 5);
        assert_eq!(snapshot.success_count, 2);
        assert_eq!(snapshot.failure_count, 3);
        assert_eq!(snapshot.http_failures, 2);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.interrupted, 1);
        assert_eq!(snapshot.dropped_iterations, 1);
        assert_eq!(snapshot.accounted(), 6);

        // Interrupted and dropped outcomes carry no latency.
        let latency = snapshot.latency.unwrap();
        assert_eq!(latency.max, ms(1000));
        assert_eq!(latency.min, ms(3));
    }

    #[test]
    fn no_samples_no_latency() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(&Outcome::dropped());
        assert_eq!(aggregator.snapshot().latency, None);
    }

    #[test]
    fn extra_percentiles_are_estimated() {
        let aggregator = MetricsAggregator::new();
        for v in 1..=1000 {
            aggregator.record(&Outcome::success(ms(v)));
        }

        let latency = aggregator.snapshot_with(&[75., 95.]).latency.unwrap();
        assert_eq!(latency.extra.len(), 1);
        let p75 = latency.percentile(75.).unwrap().as_secs_f64() * 1000.;
        assert!((p75 - 750.).abs() <= 20., "p75 = {p75}");
    }

    #[test]
    fn snapshots_are_repeatable() {
        let aggregator = MetricsAggregator::new();
        for v in 1..=10 {
            aggregator.record(&Outcome::success(ms(v)));
        }
        aggregator.flush();
        let a = aggregator.snapshot().latency;
        let b = aggregator.snapshot().latency;
        assert_eq!(a, b);
    }

    #[test]
    fn identical_latencies_with_interleaved_snapshots() {
        let aggregator = MetricsAggregator::new();
        for i in 0..2000 {
            aggregator.record(&Outcome::success(ms(100)));
            if i % 25 == 0 {
                aggregator.snapshot();
            }
        }

        let latency = aggregator.snapshot_with(&[99.9]).latency.unwrap();
        assert_eq!(latency.p50, ms(100));
        assert_eq!(latency.p99, ms(100));
        assert_eq!(latency.percentile(99.9), Some(ms(100)));
    }

    #[test]
    fn mostly_identical_latencies_with_outliers() {
        let aggregator = MetricsAggregator::new();
        for i in 0..5000 {
            let latency = match i % 500 {
                0 => ms(3),
                1 => ms(900),
                _ => Duration::from_micros(12_345),
            };
            aggregator.record(&Outcome::success(latency));
            if i % 40 == 0 {
                aggregator.snapshot();
            }
        }

        let latency = aggregator.snapshot().latency.unwrap();
        assert_eq!(latency.min, ms(3));
        assert_eq!(latency.max, ms(900));
        let p50 = latency.p50.as_secs_f64() * 1000.;
        assert!((p50 - 12.345).abs() < 0.5, "p50 = {p50}");
        assert!(latency.p50 <= latency.p90);
        assert!(latency.p95 <= latency.p99);
    }

    #[test]
    fn half_published_sample_has_no_latency() {
        let aggregator = MetricsAggregator::new();
        // A count whose min/max have not landed yet.
        aggregator.latency_count.store(1, Ordering::Release);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.latency, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = aggregator.clone();
                tokio::spawn(async move {
                    for v in 0..1000 {
                        aggregator.record(&Outcome::success(Duration::from_micros(v)));
                        if v % 100 == 0 {
                            aggregator.flush();
                        }
                        if v % 250 == 0 {
                            aggregator.snapshot();
                        }
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.requests, 8000);
        assert_eq!(snapshot.success_count, 8000);
    }
}
