use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use surge::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_LOG_FILTER: &str = "surge=info";
const EXIT_THRESHOLDS_FAILED: u8 = 99;

#[derive(Parser, Debug)]
#[command(name = "surge", version, about = "Open-loop load generator for event ingestion")]
struct Cli {
    /// JSON run configuration. The built-in ingestion profile is used when absent.
    #[arg(short, long, env = "SURGE_CONFIG")]
    config: Option<PathBuf>,

    /// Host (and port) of the ingestion service, optionally with a scheme.
    #[arg(long, env = "TARGET_HOST", default_value = "localhost:8080")]
    target_host: String,

    #[arg(long, default_value = "/events")]
    endpoint: String,

    /// Where the JSON summary is written.
    #[arg(long, env = "RESULTS_PATH", default_value = "loadtest/results.json")]
    results_path: PathBuf,

    /// Serve Prometheus metrics on this address while the test runs.
    #[arg(long)]
    prometheus: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> ExitCode {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(summary) if summary.passed => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(EXIT_THRESHOLDS_FAILED),
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunSummary> {
    let config = load_config(cli.config.as_deref()).await?;
    let plan = RunPlan::compile(&config).context("invalid run configuration")?;

    if let Some(parent) = cli.results_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    if let Some(addr) = cli.prometheus {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!("Serving metrics on {addr}");
    }

    let url = target_url(&cli.target_host, &cli.endpoint);
    info!("Targeting {url}");

    let test = LoadTest::new(plan, EventSupplier, HttpTransport::new(url));
    tokio::spawn(handle_interrupts(test.stop_handle()));
    let summary = test.run().await;

    report(&summary);
    let json = serde_json::to_string_pretty(&summary).context("serializing summary")?;
    tokio::fs::write(&cli.results_path, json)
        .await
        .with_context(|| format!("writing {}", cli.results_path.display()))?;
    info!("Summary written to {}", cli.results_path.display());

    Ok(summary)
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<RunConfig> {
    let Some(path) = path else {
        info!("No configuration given, using the ingestion profile");
        return Ok(RunConfig::ingestion());
    };
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    RunConfig::from_json(&json).with_context(|| format!("parsing {}", path.display()))
}

fn target_url(host: &str, endpoint: &str) -> String {
    let host = host.trim_end_matches('/');
    let endpoint = endpoint.trim_start_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}/{endpoint}")
    } else {
        format!("http://{host}/{endpoint}")
    }
}

/// First ctrl-c stops firing and lets in-flight requests finish; the second abandons them.
async fn handle_interrupts(stop: StopHandle) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("Interrupted, finishing in-flight requests (ctrl-c again to abort)");
    stop.graceful();

    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Aborting in-flight requests");
        stop.force();
    }
}

fn report(summary: &RunSummary) {
    for (metric, values) in &summary.metrics {
        let line = values
            .iter()
            .map(|(stat, value)| format!("{stat}={value:.2}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!("{metric:.<22} {line}");
    }

    for result in &summary.thresholds {
        let observed = result
            .observed
            .map(|v| format!("{v:.3}"))
            .unwrap_or_else(|| "n/a".to_string());
        if result.passed {
            info!("PASS {}: {} (observed {observed})", result.metric, result.threshold);
        } else {
            warn!(
                "FAIL {}: {} (observed {observed}{})",
                result.metric,
                result.threshold,
                result
                    .reason
                    .as_deref()
                    .map(|r| format!(", {r}"))
                    .unwrap_or_default()
            );
        }
    }

    if summary.passed {
        info!("All thresholds passed");
    } else {
        warn!(
            "{} of {} thresholds failed",
            summary.failed_thresholds().count(),
            summary.thresholds.len()
        );
    }
}
