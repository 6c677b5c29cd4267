use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use wpt_charts::cache::spawn_cache_janitor;
use wpt_charts::config::{AppSettings, CliArgs, SUBMISSION_SPACING_SECS};
use wpt_charts::runner::link::SimpleSelectorResolver;
use wpt_charts::runner::prepare::HttpPageFetcher;
use wpt_charts::runner::schedule::spawn_all_schedules;
use wpt_charts::runner::TestRunner;
use wpt_charts::server;
use wpt_charts::state::{build_http_client, AppState};
use wpt_charts::store::open_store;
use wpt_charts::suite_config::AppConfig;
use wpt_charts::wpt::client::WptClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Console always, plus a daily rolling file when --log-dir is set.
    // The guard must outlive the server so buffered lines get flushed.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "wpt_charts=info,tower_http=info".into());
    let (file_layer, _log_guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "wpt-charts.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    info!("Starting wpt-charts v{}", env!("CARGO_PKG_VERSION"));
    let settings = AppSettings::from_args(args);
    info!("Suite config: {:?}", settings.suite_config_path);
    info!("Store: {:?}", settings.store);
    info!("Dev mode: {}", settings.dev_mode);

    let config = Arc::new(
        AppConfig::load(&settings.suite_config_path).context("Failed to load suite config")?,
    );
    info!(
        "Loaded {} suite(s), WPT server {}",
        config.test_suites.len(),
        config.wpt_server()
    );

    let store = open_store(&settings).context("Failed to open result store")?;
    let http = build_http_client().context("Failed to build HTTP client")?;

    let wpt = WptClient::new(http.clone(), config.wpt_server())
        .context("Invalid WPT server URL")?;

    let runner = Arc::new(TestRunner::new(
        config.clone(),
        store.clone(),
        Arc::new(wpt),
        Arc::new(HttpPageFetcher::new(http)),
        Arc::new(SimpleSelectorResolver),
        Duration::from_secs(SUBMISSION_SPACING_SECS),
    ));

    if settings.schedule_enabled {
        let handles = spawn_all_schedules(&runner, &config);
        info!("Started {} suite schedule(s)", handles.len());
    } else {
        info!("Scheduling disabled, tests run only via /run_tests");
    }

    let state = Arc::new(AppState::new(
        config,
        store,
        runner,
        settings.dev_mode,
    ));
    let _janitor = spawn_cache_janitor(state.cache.clone(), Duration::from_secs(60));

    let router = server::build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", settings.port)).await?;
    info!("Listening on http://0.0.0.0:{}", settings.port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("wpt-charts shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
