//! End-of-run threshold evaluation.
use std::collections::BTreeMap;
use surge_core::{
    millis, Aggregation, MetricName, MetricsSnapshot, RunSummary, Threshold, ThresholdResult,
};

/// Percentiles the thresholds need on top of the ones every snapshot carries.
pub fn required_percentiles(thresholds: &[Threshold]) -> Vec<f64> {
    let mut percentiles: Vec<f64> = thresholds
        .iter()
        .filter_map(|t| match t.aggregation {
            Aggregation::Percentile(p) => Some(p),
            _ => None,
        })
        .collect();
    percentiles.sort_by(f64::total_cmp);
    percentiles.dedup();
    percentiles
}

/// Checks every threshold against the snapshot. The run passes only if all of them pass; a run
/// without thresholds always passes.
pub fn evaluate(snapshot: &MetricsSnapshot, thresholds: &[Threshold]) -> RunSummary {
    let results: Vec<ThresholdResult> = thresholds
        .iter()
        .map(|threshold| match observe(snapshot, threshold) {
            Ok(observed) => ThresholdResult {
                metric: threshold.metric.to_string(),
                threshold: threshold.source.clone(),
                observed: Some(observed),
                passed: threshold.passes(observed),
                reason: None,
            },
            Err(reason) => ThresholdResult {
                metric: threshold.metric.to_string(),
                threshold: threshold.source.clone(),
                observed: None,
                passed: false,
                reason: Some(reason),
            },
        })
        .collect();

    RunSummary {
        elapsed_secs: snapshot.elapsed.as_secs_f64(),
        metrics: snapshot.metric_values(),
        passed: results.iter().all(|r| r.passed),
        thresholds: results,
        scenarios: BTreeMap::new(),
        snapshot: snapshot.clone(),
    }
}

fn observe(snapshot: &MetricsSnapshot, threshold: &Threshold) -> Result<f64, String> {
    const NO_REQUESTS: &str = "no requests were made";
    const NO_TIME: &str = "no time elapsed";

    match threshold.metric {
        MetricName::HttpReqDuration => {
            let latency = snapshot
                .latency
                .as_ref()
                .ok_or_else(|| "no latency samples".to_string())?;
            let value = match threshold.aggregation {
                Aggregation::Avg => latency.avg,
                Aggregation::Min => latency.min,
                Aggregation::Max => latency.max,
                Aggregation::Med => latency.p50,
                Aggregation::Percentile(p) => latency
                    .percentile(p)
                    .ok_or_else(|| format!("p({p}) was not estimated"))?,
                other => return Err(unsupported(threshold.metric, other)),
            };
            Ok(millis(value))
        }
        MetricName::HttpReqs => match threshold.aggregation {
            Aggregation::Count => Ok(snapshot.requests as f64),
            Aggregation::Rate => snapshot.request_rate().ok_or_else(|| NO_TIME.to_string()),
            other => Err(unsupported(threshold.metric, other)),
        },
        MetricName::HttpReqFailed => match threshold.aggregation {
            Aggregation::Rate => snapshot
                .http_failed_rate()
                .ok_or_else(|| NO_REQUESTS.to_string()),
            other => Err(unsupported(threshold.metric, other)),
        },
        MetricName::Errors => match threshold.aggregation {
            Aggregation::Rate => snapshot.error_rate().ok_or_else(|| NO_REQUESTS.to_string()),
            other => Err(unsupported(threshold.metric, other)),
        },
        MetricName::DroppedIterations => match threshold.aggregation {
            Aggregation::Count => Ok(snapshot.dropped_iterations as f64),
            Aggregation::Rate => snapshot.dropped_rate().ok_or_else(|| NO_TIME.to_string()),
            other => Err(unsupported(threshold.metric, other)),
        },
    }
}

fn unsupported(metric: MetricName, aggregation: Aggregation) -> String {
    format!("{metric} has no {aggregation} aggregation")
}
