use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter("mock_service=info,tower_http=warn")
        .init();

    PrometheusBuilder::new()
        .with_http_listener("0.0.0.0:8081".parse::<SocketAddr>()?)
        .install()?;

    tokio::spawn(mock_service::throughput_task());
    mock_service::run("0.0.0.0:8080".parse()?).await
}
