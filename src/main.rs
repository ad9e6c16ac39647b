use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tsdb_console_server::services::config_store::{
    ConfigGateway, ConfigStore, MemoryConfigStore, RedisConfigStore,
};
use tsdb_console_server::services::tsdb::TsdbClient;
use tsdb_console_server::{cli, config, openapi, routes, state, static_assets};

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind tsdb-console-server on {addr}: port already in use. Stop the other service using this port or re-run with --port to choose another port.",
            );
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to bind tsdb-console-server on {addr}"))
        }
    }
}

async fn config_store(redis_url: Option<&str>) -> Result<Arc<dyn ConfigStore>> {
    match redis_url {
        Some(url) => {
            let store = RedisConfigStore::connect(url).await?;
            tracing::info!("using redis key configuration store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("REDIS_URL not set; key configuration is kept in memory and lost on restart");
            Ok(Arc::new(MemoryConfigStore::new()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    if args.print_openapi {
        println!(
            "{}",
            serde_json::to_string_pretty(&openapi::openapi_json())?
        );
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let addr = args.listen_addr();
    let config = config::ServerConfig::from_env(args.static_root)?;
    let store = config_store(config.redis_url.as_deref()).await?;
    let http = reqwest::Client::builder()
        .user_agent(concat!("tsdb-console-server/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let state = state::AppState {
        config: config.clone(),
        tsdb: TsdbClient::new(http, config.upstream_timeout),
        key_configs: ConfigGateway::new(store, config.config_store_timeout),
    };

    let app = routes::app(state, static_assets::service(config.static_root.clone())?)?;
    let listener = bind_listener(&addr).await?;
    tracing::info!(
        %addr,
        default_api_url = %config.default_api_url,
        "tsdb-console-server listening"
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}
