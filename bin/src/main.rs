#![allow(clippy::cognitive_complexity)]
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

mod control_socket;
mod startup_health;
mod v6_client;

use dhcpd_core::{
    Register, Server,
    config::{
        cli::{self, Parser},
        trace,
    },
    dhcproto::v4,
    tokio::{self, runtime::Builder, signal, task::JoinHandle},
    tracing::*,
};
use external_api::{ExternalApi, Health};
use leasequery::LeaseQuery;
use leases::Leases;
use message_type::MsgType;
use parking_lot::{Mutex, RwLock};
use startup_health::verify_startup_subsystems;
use static_addr::StaticAddr;
use tokio_util::sync::CancellationToken;

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> Result<()> {
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.log_level)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv::dotenv() {
        debug!(?err, ".env file not loaded");
    }

    let rt = Builder::new_multi_thread()
        .thread_name(&config.thread_name)
        .enable_all()
        .build()?;

    rt.block_on(async move {
        match dhcpd_core::tokio::spawn(async move { start(config).await }).await {
            Err(err) => error!(?err, "failed to start server"),
            Ok(Err(err)) => error!(?err, "exited with error"),
            Ok(_) => debug!("exiting..."),
        }
    });

    Ok(())
}

async fn start(config: cli::Config) -> Result<()> {
    info!(server_id = %config.server_id, "using id");

    debug!(path = ?config.config_path, "reading config");
    let source = tokio::fs::read_to_string(&config.config_path)
        .await
        .with_context(|| format!("failed to read {}", config.config_path.display()))?;
    let (tree, db, _options, _root) =
        confparse::parse_config(&source).map_err(|err| anyhow!("{err}"))?;
    info!(hosts = tree.hosts.len(), leases = db.lease_count(), "config parsed");

    let tree = Arc::new(RwLock::new(tree));
    let db = Arc::new(Mutex::new(db));
    let universes = Arc::new(expr::UniverseRegistry::new());

    let interfaces = confparse::iface::v4_find_interfaces(config.interfaces.clone())
        .context("failed to discover v4 interfaces")?;
    if interfaces.is_empty() {
        return Err(anyhow!("no usable v4 interfaces found"));
    }
    let v6_mac = interfaces
        .iter()
        .find_map(|i| i.mac)
        .map(|mac| mac.octets().to_vec())
        .unwrap_or_else(|| vec![0x52, 0x54, 0x00, 0x00, 0x00, 0x01]);

    let api = ExternalApi::new(config.external_api, Arc::clone(&db));

    debug!("starting v4 server");
    let mut v4: Server<v4::Message> = Server::new(config.clone(), interfaces)?;
    MsgType::new(Arc::clone(&tree), Arc::clone(&universes))?.register(&mut v4);
    StaticAddr::new(Arc::clone(&tree))?.register(&mut v4);
    Leases::new(Arc::clone(&tree), Arc::clone(&universes), Arc::clone(&db)).register(&mut v4);
    LeaseQuery::new(Arc::clone(&db)).register(&mut v4);

    let token = CancellationToken::new();
    let api_sender = api.sender();
    let mut api_guard = api.start(token.clone());

    let mut v4_task = tokio::spawn(v4.start(shutdown_signal(token.clone())));

    let control_shared = control_socket::Shared {
        tree: Arc::clone(&tree),
        db: Arc::clone(&db),
    };
    let control_path = config.control_socket.clone();
    let control_token = token.clone();
    let control_task: JoinHandle<Result<()>> =
        tokio::spawn(async move { control_socket::run(control_path, control_shared, control_token).await });

    let v6_token = token.clone();
    let v6_addr = config.v6_addr;
    let mut v6_task: JoinHandle<Result<()>> =
        tokio::spawn(async move { v6_client::run(v6_addr, v6_mac, v6_token).await });

    // Keep health BAD until all startup-critical tasks are confirmed running.
    if let Err(err) =
        verify_startup_subsystems(&mut api_guard, &mut v4_task, Some(&mut v6_task), "standalone").await
    {
        let _ = api_sender.send(Health::Bad).await;
        token.cancel();
        return Err(err);
    }

    debug!("changing health to good after startup checks passed");
    api_sender
        .send(Health::Good)
        .await
        .context("error occurred in changing health status to Good")?;

    let server_result = flatten(v4_task).await.map(|_| ());
    if let Err(err) = server_result {
        let _ = api_sender.send(Health::Bad).await;
        token.cancel();
        return Err(err);
    }
    if let Err(err) = api_guard.await {
        error!(?err, "error waiting for web server API");
    }
    if let Err(err) = control_task.await {
        error!(?err, "error waiting for control socket task");
    }
    if let Err(err) = v6_task.await {
        error!(?err, "error waiting for dhcpv6 client task");
    }
    Ok(())
}

async fn flatten<T>(handle: JoinHandle<Result<T, anyhow::Error>>) -> Result<T, anyhow::Error> {
    match handle.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err),
        Err(err) => Err(anyhow!(err)),
    }
}

async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    let ret = signal::ctrl_c().await.map_err(|err| anyhow!(err));
    token.cancel();
    ret
}
