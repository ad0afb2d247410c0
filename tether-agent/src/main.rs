//! tether-agent: reconciles managed projects against the remote control plane.
//!
//! Project documents are read from a directory, reconciled one cycle at a
//! time by a bounded worker pool, and written back with their status and
//! ownership snapshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tether_engine::remote::http::HttpRemote;
use tether_engine::{
    FileProjectStore, FileSecretStore, ProjectReconciler, ReconcileConfig, RetryPolicy,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod backoff;
mod controller;

use controller::{Controller, ControllerConfig};

/// tether agent
#[derive(Parser, Debug)]
#[command(name = "tether-agent", version, about)]
struct Args {
    /// Directory of managed project documents (<namespace>/<name>.json)
    #[arg(long, default_value = "/var/lib/tether/projects")]
    store_dir: PathBuf,

    /// Directory of secrets (<namespace>/<name>.json)
    #[arg(long, default_value = "/var/lib/tether/secrets")]
    secrets_dir: PathBuf,

    /// Remote control-plane base URL
    #[arg(long, default_value = "https://cloud.mongodb.com/api/atlas/v2")]
    api_endpoint: String,

    /// Bearer token for the remote API
    #[arg(long, env = "TETHER_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    api_timeout: u64,

    /// Number of projects reconciled concurrently
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Seconds between full resyncs of every project
    #[arg(long, default_value = "60")]
    resync_interval: u64,

    /// Seconds to wait before re-checking in-progress work
    #[arg(long, default_value = "10")]
    in_progress_delay: u64,

    /// Initial retry delay in seconds after a failed cycle
    #[arg(long, default_value = "5")]
    backoff_base: u64,

    /// Maximum retry delay in seconds
    #[arg(long, default_value = "300")]
    backoff_max: u64,

    /// Reconcile every project once and exit
    #[arg(long)]
    once: bool,

    /// Instance name for log context (defaults to hostname)
    #[arg(long)]
    instance: Option<String>,
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = signal::ctrl_c();
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = ctrl_c.await;
            info!("Received SIGINT");
            token.cancel();
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tether_agent=info,tether_engine=info,reqwest=warn,hyper=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let instance = args.instance.clone().unwrap_or_else(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string())
    });

    info!("Starting tether-agent: {}", instance);
    info!("API endpoint: {}", args.api_endpoint);
    info!("Project store: {}", args.store_dir.display());

    let remote = HttpRemote::new(
        &args.api_endpoint,
        args.api_token.as_deref().unwrap_or_default(),
        Duration::from_secs(args.api_timeout),
    )
    .context("Failed to build remote API client")?;

    let secrets = Arc::new(FileSecretStore::new(&args.secrets_dir));
    let reconciler = ProjectReconciler::new(Arc::new(remote), secrets, ReconcileConfig::default())
        .with_retry_policy(RetryPolicy {
            in_progress_delay: Duration::from_secs(args.in_progress_delay),
        });

    let store = Arc::new(FileProjectStore::new(&args.store_dir));
    let mut controller = Controller::new(
        store,
        Arc::new(reconciler),
        ControllerConfig {
            workers: args.workers,
            resync_interval: Duration::from_secs(args.resync_interval.max(1)),
            backoff_base: Duration::from_secs(args.backoff_base),
            backoff_max: Duration::from_secs(args.backoff_max),
        },
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    if args.once {
        let converged = controller.run_once(shutdown).await?;
        if !converged {
            bail!("not every project converged");
        }
        info!("All projects converged");
        return Ok(());
    }

    controller.run(shutdown).await;
    info!("Shutdown complete");
    Ok(())
}
