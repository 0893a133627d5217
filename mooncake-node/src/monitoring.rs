//! Logging and metrics bootstrap: `tracing-subscriber` with an env filter,
//! and a Prometheus exporter served over a tiny `warp` route, the same
//! shape the teacher process uses for its own metrics endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn init_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install the Prometheus recorder")
        })
        .clone()
}

pub async fn start_metrics_server(handle: PrometheusHandle, addr: SocketAddr) {
    let route = warp::path("metrics").map(move || handle.render());
    tracing::info!(%addr, "serving metrics");
    warp::serve(route).run(addr).await;
}
