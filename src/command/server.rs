use crate::config::config_holder::ConfigHolder;
use crate::config::toml::ConfigToml;
use crate::host::InventoryHost;
use crate::init;
use crate::server::web_api_server::{WebApiState, app_router};
use anyhow::Context as _;
use concepts::time::Now;
use notifier::{Notifier, NotifierConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn};

pub(crate) async fn run(config: Option<PathBuf>) -> Result<(), anyhow::Error> {
    let config_holder = ConfigHolder::new(config)?;
    let mut config = config_holder.load_config().await?;
    let log = std::mem::take(&mut config.log);
    let _guard = init::init(log, &config_holder.path_prefixes).await?;
    run_internal(config, &config_holder).await
}

async fn run_internal(
    config: ConfigToml,
    config_holder: &ConfigHolder,
) -> Result<(), anyhow::Error> {
    let store = Arc::new(super::target::open_store(&config, config_holder).await?);
    info!(uri = %store.get(), "Notification target loaded");
    let host = Arc::new(InventoryHost::new(config.host.root_url));
    let notifier_config = NotifierConfig::from(config.delivery);
    let (notifier, notifier_handle) =
        Notifier::spawn_new(notifier_config, host.clone(), store.clone(), Now)
            .context("cannot start the notifier")?;

    let listening_addr = config.api.listening_addr;
    let tcp_listener = TcpListener::bind(listening_addr)
        .await
        .with_context(|| format!("cannot bind socket {listening_addr}"))?;
    let app = app_router(WebApiState {
        notifier,
        store,
        host,
    })
    .layer(TraceLayer::new_for_http().make_span_with(make_span));

    info!("Serving sidecar API requests at {listening_addr}");
    let served = axum::serve(tcp_listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for SIGINT event - {err:?}");
            }
            warn!("Received SIGINT, waiting for the API server to shut down");
        })
        .await
        .with_context(|| format!("API server error listening on {listening_addr}"));
    // Scheduled notifications are still delivered after the API stops.
    notifier_handle.close().await;
    served
}

fn make_span<B>(request: &axum::http::Request<B>) -> tracing::Span {
    info_span!(
        "incoming API request",
        method = %request.method(),
        uri = %request.uri()
    )
}
