//! Colloquy server entry point.

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use colloquy_server::settings::{default_settings_path, load_settings};
use colloquy_server::ws::{self, AppState};
use colloquy_server::stub_engines_from_settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "colloquy_server=info,colloquy_core=info".into()),
        )
        .init();

    let settings_path = std::env::var_os("COLLOQUY_SETTINGS")
        .map(Into::into)
        .unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    settings.apply_overrides(|key| std::env::var(key).ok());
    info!(path = %settings_path.display(), ?settings, "settings loaded");

    // No real engine adapters are wired in yet; the stubs keep the whole
    // pipeline exercisable end-to-end.
    warn!("running with stub recognition/answer/synthesis engines");
    let state = AppState {
        engines: stub_engines_from_settings(&settings),
        config: settings.session_config(),
    };

    let app = ws::router(state);
    let listener = tokio::net::TcpListener::bind(&settings.bind_address).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received, shutting down"),
        _ = terminate => info!("terminate signal received, shutting down"),
    }
}
