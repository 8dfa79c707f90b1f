//! Wavecast Back binary entrypoint wiring REST, WebSocket, and store layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wavecast_back::clock::Clock;
use wavecast_back::config::AppConfig;
use wavecast_back::dao::memory::MemoryStore;
use wavecast_back::routes;
use wavecast_back::services::announcer::{CommandSynthesizer, NullSynthesizer, SpeechSynthesizer};
use wavecast_back::services::resolver::{self, YtDlpResolver};
use wavecast_back::state::{AppState, SharedState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();

    let store = match &config.seed_path {
        Some(path) => {
            Arc::new(MemoryStore::from_seed_file(path).context("loading store seed file")?)
        }
        None => Arc::new(MemoryStore::new()),
    };
    let stores = store.stores();

    let stream_resolver = Arc::new(YtDlpResolver::new(config.extractor_program.clone()));
    let synthesizer: Arc<dyn SpeechSynthesizer> = match &config.tts_command {
        Some(template) => Arc::new(CommandSynthesizer::new(template.clone())),
        None => Arc::new(NullSynthesizer),
    };

    let app_state = AppState::new(config, stores, stream_resolver, synthesizer, Clock::system());

    // Cron jobs must register cleanly or startup aborts.
    app_state
        .scheduler()
        .initialize(&app_state)
        .await
        .context("registering schedule jobs")?;

    resolver::spawn_sweeper(app_state.url_cache_handle());

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
