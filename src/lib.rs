//! pi-monitor - headless camera and microphone recording nodes.
//!
//! A node hosts recording schedulers and a few utility objects behind a
//! path-routed JSON RPC endpoint. This crate provides the scheduler, the
//! RPC dispatch and hosting machinery, and the node entry points.

pub mod cli;
pub mod commands;
pub mod config;
pub mod device;
pub mod node;
pub mod recorder;
pub mod rpc;
pub mod utils;

use anyhow::Context;
use cli::Cli;
use node::{catalog, host_node, simulated_devices, NodeSettings};
use rpc::{Args, HostOptions, ObjectHost, Router, WorkerCommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the log subscriber. Logs go to stderr; a worker's stdout is its
/// reply channel.
pub fn init_tracing() {
    let default_filter = if std::env::var_os("PM_DEBUG").is_some() {
        "pi_monitor=debug"
    } else {
        "pi_monitor=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Host the node's objects and serve them until interrupted
pub fn run_node(cli: &Cli) -> anyhow::Result<()> {
    let kind = cli.node_kind().context("Not a node command")?;
    let settings = cli.settings();
    tracing::info!("Starting pi-monitor v{} as {:?}", env!("CARGO_PKG_VERSION"), kind);

    let host = ObjectHost::new(
        catalog(&settings, simulated_devices()),
        HostOptions {
            worker: WorkerCommand::current_exe(cli.worker_prefix())?,
            call_timeout: settings.call_timeout,
        },
    );
    let mut router = Router::new();
    host_node(kind, settings.isolate, &host, &mut router).context("Failed to host node objects")?;
    let router = Arc::new(router);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let served = runtime.block_on(rpc::server::serve(
        Arc::clone(&router),
        cli.listen_addr(),
        shutdown_signal(),
    ));

    let failures = host.shutdown_all(&router);
    served.context("HTTP server failed")?;
    if !failures.is_empty() {
        anyhow::bail!("{} hosted objects failed to shut down cleanly", failures.len());
    }
    Ok(())
}

/// Serve one object over stdin/stdout until the parent closes stdin
pub fn run_worker(settings: &NodeSettings, kind: &str, args: &str) -> anyhow::Result<()> {
    let args: Args = serde_json::from_str(args).context("Invalid worker arguments")?;
    let object = catalog(settings, simulated_devices())
        .construct(kind, &args)
        .with_context(|| format!("Failed to construct {}", kind))?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    rpc::worker::serve(object.as_ref(), stdin.lock(), stdout.lock())?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", error);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!("Failed to listen for SIGTERM: {}", error);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown requested");
}
