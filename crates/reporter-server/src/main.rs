//! Reporter server binary.
//!
//! Starts an axum HTTP server with structured logging and graceful shutdown
//! on SIGTERM/SIGINT. Capture begins when a client posts to `/scan`.

use reporter_capture::{LiveCapture, LiveOptions};
use reporter_server::config::{self, LoggingConfig};
use reporter_server::{app, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Where the config path came from, for the startup log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigSource {
    Argument,
    Environment,
    Default,
}

/// Picks the config file: first CLI argument, then `REPORTER_CONFIG_PATH`,
/// then `config.toml` in the working directory. Blank values are skipped.
fn config_path(argument: Option<String>, environment: Option<String>) -> (String, ConfigSource) {
    let non_blank = |value: &String| !value.trim().is_empty();

    argument
        .filter(non_blank)
        .map(|path| (path, ConfigSource::Argument))
        .or_else(|| {
            environment
                .filter(non_blank)
                .map(|path| (path, ConfigSource::Environment))
        })
        .unwrap_or_else(|| (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let (path, source) = config_path(
        std::env::args().nth(1),
        std::env::var("REPORTER_CONFIG_PATH").ok(),
    );
    let config = config::load_config(Some(path.as_str()))
        .expect("failed to load configuration; the server cannot start without valid config");

    init_tracing(&config.logging);
    tracing::info!(path = %path, source = ?source, "loaded configuration");
    tracing::debug!(enrichment = ?config.enrichment, capture = ?config.capture, "effective configuration");

    let backend = Arc::new(LiveCapture::new(LiveOptions {
        snaplen: config.capture.snaplen,
        promiscuous: config.capture.promiscuous,
    }));
    let state = AppState::from_config(&config, backend, tokio::runtime::Handle::current())
        .expect("failed to assemble the detection pipeline from configuration");

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");
    tracing::info!(%addr, "reporter server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("reporter server shut down");
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let name = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.expect("failed to install Ctrl+C handler");
                "SIGINT"
            }
            _ = terminate.recv() => "SIGTERM",
        };
        tracing::info!(signal = name, "received shutdown signal");
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        tracing::info!(signal = "SIGINT", "received shutdown signal");
    }
}
