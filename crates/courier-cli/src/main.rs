//! courier: accepts issue reports over HTTP, keeps them on local disk and
//! relays them to a remote queue.
//!
//! # Usage
//! ```bash
//! courier --queue http://localhost:4566/000000000000/issues [--conf-file courier.json] [--verbose]
//! ```

mod config;
mod queue_sink;
mod web;

use std::sync::Arc;

use anyhow::Context;
use axum::ServiceExt;
use axum::extract::Request;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier_core::app::RelayLoop;
use courier_core::{FsStore, Store};

use crate::config::{Args, Config};
use crate::queue_sink::QueueSink;

const DEFAULT_LOG_FILTER: &str = "courier=info,courier_core=info,tower_http=info";
const VERBOSE_LOG_FILTER: &str = "courier=debug,courier_core=debug,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = Config::load(&args)?;
    config.log();

    let store: Arc<dyn Store> = Arc::new(
        FsStore::open(config.store_config())
            .with_context(|| format!("failed to open the local store at {}", config.local_store.display()))?,
    );

    let sink = QueueSink::new(config.sink_config())?;
    info!(target_url = %sink.target(), "relaying to the remote queue");

    let relay = RelayLoop::new(Arc::clone(&store), Arc::new(sink)).spawn();

    let app = web::app(Arc::clone(&store));
    let listener = tokio::net::TcpListener::bind((config.ip.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.ip, config.port))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("shutting down");
    relay.shutdown_and_join().await;
    info!(pending = store.count(), "stopped");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
