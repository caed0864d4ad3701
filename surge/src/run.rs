//! Runs a [`RunPlan`] end to end.
use crate::aggregator::MetricsAggregator;
use crate::plan::{RunPlan, ScenarioPlan};
use crate::pool::{Dispatcher, WorkerPool};
use crate::schedule::CompositeSchedule;
use crate::scheduler::ArrivalScheduler;
use crate::stop::{StopHandle, StopSignal};
use crate::supplier::RequestSupplier;
use crate::thresholds::{evaluate, required_percentiles};
use crate::transport::Transport;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use surge_core::{millis, RunSummary, ScenarioReport, FLUSH_INTERVAL};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// A planned run bound to a request supplier and a transport.
///
/// # Example
/// ```no_run
/// use surge::prelude::*;
///
/// # async fn example() -> Result<(), ConfigError> {
/// let plan = RunPlan::compile(&RunConfig::ingestion())?;
/// let transport = HttpTransport::new("http://localhost:8080/events");
/// let summary = LoadTest::new(plan, EventSupplier, transport).run().await;
/// assert!(summary.passed);
/// # Ok(())
/// # }
/// ```
pub struct LoadTest<S, T> {
    plan: RunPlan,
    supplier: Arc<S>,
    transport: Arc<T>,
    stop: StopHandle,
}

impl<S, T> LoadTest<S, T>
where
    S: RequestSupplier,
    T: Transport + Sync + 'static,
{
    pub fn new(plan: RunPlan, supplier: S, transport: T) -> Self {
        Self {
            plan,
            supplier: Arc::new(supplier),
            transport: Arc::new(transport),
            stop: StopHandle::new(),
        }
    }

    /// Handle for stopping the run from elsewhere, e.g. a signal handler.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub async fn run(self) -> RunSummary {
        let Self {
            plan,
            supplier,
            transport,
            stop,
        } = self;
        info!(
            "Running {} scenarios: ~{:.0} requests over {}",
            plan.scenarios.len(),
            plan.expected_requests(),
            humantime::format_duration(plan.timeline.end())
        );

        let aggregator = Arc::new(MetricsAggregator::new());
        let start = Instant::now();

        let mut scenarios = JoinSet::new();
        for scenario in plan.scenarios {
            scenarios.spawn(run_scenario(
                scenario,
                start,
                supplier.clone(),
                transport.clone(),
                aggregator.clone(),
                stop.signal(),
            ));
        }

        let monitor = tokio::spawn(monitor(
            aggregator.clone(),
            plan.timeline,
            plan.progress_interval,
            start,
        ));
        let cap = tokio::spawn(cap(stop.clone(), start + plan.max_duration));

        let mut reports = BTreeMap::new();
        while let Some(res) = scenarios.join_next().await {
            match res {
                Ok((name, report)) => {
                    reports.insert(name, report);
                }
                Err(err) => error!("Scenario task failed: {err}"),
            }
        }
        cap.abort();
        monitor.abort();

        let snapshot = aggregator.snapshot_with(&required_percentiles(&plan.thresholds));
        let mut summary = evaluate(&snapshot, &plan.thresholds);
        summary.scenarios = reports;

        info!(
            "Run complete in {}: {} requests, {} dropped, {}",
            humantime::format_duration(Duration::from_millis(snapshot.elapsed.as_millis() as u64)),
            snapshot.requests,
            snapshot.dropped_iterations,
            if summary.passed { "passed" } else { "failed" }
        );
        summary
    }
}

#[instrument(name = "scenario", skip_all, fields(name = %scenario.name))]
async fn run_scenario<S, T>(
    scenario: ScenarioPlan,
    start: Instant,
    supplier: Arc<S>,
    transport: Arc<T>,
    aggregator: Arc<MetricsAggregator>,
    mut stop: StopSignal,
) -> (String, ScenarioReport)
where
    S: RequestSupplier,
    T: Transport + Sync + 'static,
{
    let ScenarioPlan {
        name,
        schedule,
        pool,
        graceful_stop,
        classifier,
    } = scenario;
    info!("Running {name} with {pool:?}");

    let dispatcher = Arc::new(Dispatcher::new(
        supplier,
        transport,
        classifier,
        pool.request_timeout,
    ));
    let mut workers = WorkerPool::new(name.as_str(), pool, dispatcher, aggregator);

    let scheduled = ArrivalScheduler::new(name.as_str(), schedule, stop.clone())
        .run(start, |event| workers.submit(event))
        .await;
    let pool_report = workers.shutdown(graceful_stop, &mut stop).await;

    info!("Scenario complete");
    (
        name,
        ScenarioReport {
            fired: scheduled.fired,
            peak_workers: pool_report.workers,
            peak_in_flight: pool_report.peak_in_flight,
            interrupted: pool_report.interrupted,
            stopped_early: scheduled.stopped.is_some(),
        },
    )
}

async fn cap(stop: StopHandle, deadline: Instant) {
    tokio::time::sleep_until(deadline).await;
    warn!("Maximum run duration reached, stopping");
    stop.graceful();
}

/// Folds latency samples into the digest and logs progress now and then.
async fn monitor(
    aggregator: Arc<MetricsAggregator>,
    timeline: CompositeSchedule,
    progress_interval: Duration,
    start: Instant,
) {
    let mut flush = tokio::time::interval(FLUSH_INTERVAL);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_progress = Instant::now();

    loop {
        flush.tick().await;
        aggregator.flush();

        if last_progress.elapsed() < progress_interval {
            continue;
        }
        last_progress = Instant::now();

        let elapsed = start.elapsed();
        let snapshot = aggregator.snapshot();
        let p95 = snapshot.latency.as_ref().map(|l| millis(l.p95)).unwrap_or(0.);
        info!(
            "[{}] target={:.0}/s rate={:.0}/s requests={} errors={:.2}% dropped={} p95={p95:.1}ms",
            humantime::format_duration(Duration::from_secs(elapsed.as_secs())),
            timeline.rate_at(elapsed),
            snapshot.request_rate().unwrap_or(0.),
            snapshot.requests,
            snapshot.error_rate().unwrap_or(0.) * 100.,
            snapshot.dropped_iterations,
        );
    }
}
