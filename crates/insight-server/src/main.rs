use anyhow::Context;
use clap::{value_parser, Arg, Command};
use insight_core::{logging, ServiceConfig, TaskService};
use insight_server::{routes, AppState, StaticTokenResolver};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

fn cli() -> Command {
    Command::new("insight-server")
        .version(insight_server::VERSION)
        .about("Background tasks with live notification streams")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_parser(value_parser!(PathBuf))
                .help("Path to a TOML configuration file"),
        )
        .arg(
            Arg::new("bind")
                .long("bind")
                .value_parser(value_parser!(SocketAddr))
                .help("Listen address, overrides server.bind"),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    logging::init(&config.logging).context("installing log subscriber")?;

    let addr = match matches.get_one::<SocketAddr>("bind") {
        Some(addr) => *addr,
        None => config
            .server
            .bind
            .parse()
            .with_context(|| format!("invalid server.bind {:?}", config.server.bind))?,
    };

    let resolver = StaticTokenResolver::from_config(&config.server);
    if resolver.is_empty() {
        tracing::warn!("no tokens configured, every authenticated request will be rejected");
    }

    let service = Arc::new(TaskService::new(config));
    service.spawn_maintenance();
    let api = routes(AppState::new(Arc::clone(&service), Arc::new(resolver)));

    let stopping = Arc::clone(&service);
    let (bound, server) = warp::serve(api)
        .try_bind_with_graceful_shutdown(addr, async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(%err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown requested");
            stopping.shutdown().await;
            // Open streams never end on their own; closing them lets the
            // server finish its graceful shutdown.
            stopping.hub().reset();
        })
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(%bound, version = insight_core::VERSION, "insight-server listening");
    server.await;
    tracing::info!("insight-server stopped");
    Ok(())
}
