use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kstore_storage::{connection_manager, KeyImpl};

use kstore_server::{load, shutdown_signal, App, AppConfig, AppRouter, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let args = env::args().collect::<Vec<_>>();
    let config =
        if args.len() == 3 && (args[1] == "-c" || args[1] == "--config") {
            load(&args[2])?
        } else {
            AppConfig::parse()
        };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    debug!("{:#?}", &config);
    info!("kstore {}", env!("CARGO_PKG_VERSION"));
    run_server(config).await
}

async fn run_server(config: AppConfig) -> Result<()> {
    info!("environment loaded and configuration parsed, initializing Mariadb connection...");
    let pool = connection_manager(
        &config.database_url,
        config.max_size,
        config.min_idle,
        config.acquire_timeout(),
    )
    .await
    .context("could not initialize the database connection pool")?;

    let app = Arc::new(App::new(Arc::new(KeyImpl::new(pool)), config.clone())?);
    app.key_store
        .init()
        .await
        .context("could not initialize the key store")?;

    info!("key store ready, initializing axum server...");
    let router = AppRouter::build(AppState(app.clone()));
    let host = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&host)
        .await
        .context("could not bind to endpoint")?;

    info!("api server, listening on {}", host);
    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("error while starting API server");

    app.key_store.stop();
    served
}
