use anyhow::Context;
use bedrock_transfer_proxy::{
    collaborators::{LogEvents, NoopObserver},
    config::{Args, ProxyConfig, Servers},
    connector::TcpConnector,
    proxy::Proxy,
    session::SessionServices,
};
use clap::Parser;
use mimalloc::MiMalloc;
use std::{path::Path, sync::Arc};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let config = ProxyConfig::load(&args.config)?;
    let base = args.config.parent().unwrap_or(Path::new("."));
    let servers = Servers::load(&config, base).context("failed to load servers")?;

    let observer = Arc::new(NoopObserver);
    let services = SessionServices {
        connector: Arc::new(TcpConnector::new(config.compression.level, observer.clone())),
        reconnect: Arc::new(servers.fallback().clone()),
        events: Arc::new(LogEvents),
        observer,
        queue_limits: config.queue,
        transfer_limits: config.transfer_queue,
        tick_interval: config.flush_interval(),
    };

    let proxy = Proxy::bind(
        args.bind.unwrap_or(config.bind),
        services,
        config.compression,
        servers.initial().clone(),
    )
    .await?;
    tracing::info!(
        "Started on {}, sending players to {}",
        proxy.local_addr()?,
        servers.initial().name
    );

    proxy.run().await
}
